//! `connect` handshake parameters.
//!
//! The first frame on every new socket is a `req` invoking [`CONNECT_METHOD`].
//! Only after an `ok` response to it may other requests be written.

use gateway_core::InstanceId;
use serde::{Deserialize, Serialize};

/// Method name of the handshake request.
pub const CONNECT_METHOD: &str = "connect";

/// Protocol version spoken by this client (used as both bounds).
pub const PROTOCOL_VERSION: u32 = 3;

/// Parameters of the `connect` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Lowest protocol version the client accepts.
    pub min_protocol: u32,
    /// Highest protocol version the client accepts.
    pub max_protocol: u32,
    /// Who is connecting.
    pub client: ClientInfo,
    /// Credentials.
    pub auth: AuthParams,
}

/// Client identity reported during the handshake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Stable client identifier (e.g. `operator-console`).
    pub id: String,
    /// Human-friendly name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Client version.
    pub version: String,
    /// Host platform.
    pub platform: String,
    /// Client mode (e.g. `backend`).
    pub mode: String,
    /// Per-process instance id.
    pub instance_id: InstanceId,
}

/// Credentials carried by the handshake. At least one field is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParams {
    /// Bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Shared password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ConnectParams {
    /// Build handshake parameters for the current protocol version.
    pub fn new(client: ClientInfo, auth: AuthParams) -> Self {
        Self {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client,
            auth,
        }
    }
}

impl AuthParams {
    /// Build credentials, or `None` when neither a token nor a password is
    /// present. Empty strings count as absent.
    pub fn from_parts(token: Option<&str>, password: Option<&str>) -> Option<Self> {
        let token = token.filter(|t| !t.is_empty()).map(str::to_owned);
        let password = password.filter(|p| !p.is_empty()).map(str::to_owned);
        if token.is_none() && password.is_none() {
            return None;
        }
        Some(Self { token, password })
    }
}
