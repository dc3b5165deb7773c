//! # gateway-client
//!
//! Authenticated, self-healing WebSocket RPC client for the gateway.
//!
//! - [`GatewayClient::request`]: correlated request/response over one socket,
//!   queued while disconnected and flushed in order after each handshake
//! - [`GatewayClient::on_event`] / [`GatewayClient::events`]: fan-out of
//!   unsolicited `event` frames to independent listeners
//! - Heartbeat ping/pong to detect half-open sockets
//! - Reconnect with scheduled-then-exponential backoff until shutdown
//!
//! All connection state lives in one task; handles only
//! send it commands. On connection loss, requests already written are
//! rejected with [`ClientError::ConnectionLost`] while requests still queued
//! wait for the next connection: the gateway never saw them, so sending them
//! later is safe.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
mod connection;
pub mod error;
pub mod fanout;
mod handshake;
pub mod heartbeat;
pub mod pending;
pub mod reconnect;
pub mod state;

pub use client::GatewayClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use fanout::{EventFanout, EventSubscription};
pub use gateway_protocol::{ErrorShape, EventFrame, Frame};
pub use heartbeat::{HeartbeatMonitor, HeartbeatSignal};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use state::{ClientState, ClientStats, StatsSnapshot};
