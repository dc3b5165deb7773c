//! Runtime client configuration.

use std::time::Duration;

use gateway_core::InstanceId;
use gateway_protocol::{AuthParams, ClientInfo, ConnectParams};
use gateway_settings::GatewaySettings;

use crate::error::ClientError;
use crate::reconnect::ReconnectPolicy;

/// Configuration for a [`GatewayClient`](crate::GatewayClient).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// Bearer token.
    pub token: Option<String>,
    /// Shared password.
    pub password: Option<String>,
    /// Stable client identifier.
    pub client_id: String,
    /// Human-friendly client name.
    pub display_name: Option<String>,
    /// Reported client version.
    pub version: String,
    /// Reported platform.
    pub platform: String,
    /// Reported client mode.
    pub mode: String,
    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// How long to wait for a pong before declaring the link dead.
    pub heartbeat_timeout: Duration,
    /// Upper bound for socket open plus `connect` round trip.
    pub handshake_timeout: Duration,
    /// Delay computation between reconnect attempts.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&GatewaySettings::default())
    }
}

impl From<&GatewaySettings> for ClientConfig {
    fn from(settings: &GatewaySettings) -> Self {
        Self {
            url: settings.url.clone(),
            token: settings.token.clone(),
            password: settings.password.clone(),
            client_id: settings.client.id.clone(),
            display_name: settings.client.display_name.clone(),
            version: settings.client.version.clone(),
            platform: settings.client.platform.clone(),
            mode: settings.client.mode.clone(),
            heartbeat_interval: Duration::from_millis(settings.heartbeat.interval_ms),
            heartbeat_timeout: Duration::from_millis(settings.heartbeat.timeout_ms),
            handshake_timeout: Duration::from_millis(settings.handshake_timeout_ms),
            reconnect: ReconnectPolicy::from_millis(
                &settings.reconnect.schedule_ms,
                settings.reconnect.max_delay_ms,
            ),
        }
    }
}

impl ClientConfig {
    /// Credentials for the handshake.
    pub fn auth(&self) -> Result<AuthParams, ClientError> {
        AuthParams::from_parts(self.token.as_deref(), self.password.as_deref())
            .ok_or(ClientError::MissingCredentials)
    }

    /// Build the `connect` request parameters for this process.
    pub fn connect_params(&self, instance_id: &InstanceId) -> Result<ConnectParams, ClientError> {
        let auth = self.auth()?;
        let client = ClientInfo {
            id: self.client_id.clone(),
            display_name: self.display_name.clone(),
            version: self.version.clone(),
            platform: self.platform.clone(),
            mode: self.mode.clone(),
            instance_id: instance_id.clone(),
        };
        Ok(ConnectParams::new(client, auth))
    }
}
