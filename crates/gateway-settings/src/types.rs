//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs the keys it changes.

use gateway_core::constants;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Smallest accepted reconnect cap, in milliseconds.
pub const MIN_RECONNECT_DELAY_MS: u64 = 100;

/// Root settings type for the gateway client.
///
/// ```json
/// {
///   "url": "wss://gateway.internal:18789",
///   "token": "…",
///   "heartbeat": { "intervalMs": 15000 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// WebSocket endpoint of the gateway.
    pub url: String,
    /// Bearer token for the handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Shared password for the handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Identity reported in the `connect` request.
    pub client: ClientIdentitySettings,
    /// Liveness probing.
    pub heartbeat: HeartbeatSettings,
    /// Delays between reconnect attempts.
    pub reconnect: ReconnectSettings,
    /// Upper bound for socket open plus `connect` round trip, in milliseconds.
    pub handshake_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789".to_string(),
            token: None,
            password: None,
            client: ClientIdentitySettings::default(),
            heartbeat: HeartbeatSettings::default(),
            reconnect: ReconnectSettings::default(),
            handshake_timeout_ms: 10_000,
        }
    }
}

impl GatewaySettings {
    /// Whether at least one non-empty credential is configured.
    pub fn has_credentials(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.token) || present(&self.password)
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field, reason: &str| {
            Err(SettingsError::Invalid {
                field,
                reason: reason.to_owned(),
            })
        };
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return invalid("url", &format!("expected ws:// or wss://, got {}", self.url));
        }
        if self.heartbeat.interval_ms == 0 {
            return invalid("heartbeat.intervalMs", "must be greater than zero");
        }
        if self.heartbeat.timeout_ms == 0 {
            return invalid("heartbeat.timeoutMs", "must be greater than zero");
        }
        if self.handshake_timeout_ms == 0 {
            return invalid("handshakeTimeoutMs", "must be greater than zero");
        }
        if self.reconnect.max_delay_ms < MIN_RECONNECT_DELAY_MS {
            return invalid(
                "reconnect.maxDelayMs",
                &format!("must be at least {MIN_RECONNECT_DELAY_MS}"),
            );
        }
        if self.reconnect.schedule_ms.contains(&0) {
            return invalid("reconnect.scheduleMs", "entries must be greater than zero");
        }
        if self.reconnect.schedule_ms.windows(2).any(|w| w[0] > w[1]) {
            return invalid("reconnect.scheduleMs", "must be non-decreasing");
        }
        Ok(())
    }
}

/// Client identity settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientIdentitySettings {
    /// Stable client identifier.
    pub id: String,
    /// Human-friendly name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Reported version.
    pub version: String,
    /// Reported platform.
    pub platform: String,
    /// Client mode.
    pub mode: String,
}

impl Default for ClientIdentitySettings {
    fn default() -> Self {
        Self {
            id: "operator-console".to_string(),
            display_name: Some("Operator Console".to_string()),
            version: constants::VERSION.to_string(),
            platform: constants::PLATFORM.to_string(),
            mode: "backend".to_string(),
        }
    }
}

/// Heartbeat settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Interval between pings in milliseconds.
    pub interval_ms: u64,
    /// How long to wait for a pong in milliseconds.
    pub timeout_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 10_000,
        }
    }
}

/// Reconnect backoff settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Explicit delays for the first attempts, in milliseconds.
    pub schedule_ms: Vec<u64>,
    /// Cap for the exponential phase, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            schedule_ms: vec![500, 1000, 2000, 5000],
            max_delay_ms: 30_000,
        }
    }
}
