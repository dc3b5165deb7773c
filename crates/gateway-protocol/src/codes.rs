//! Error code constants.
//!
//! Codes produced by the gateway itself arrive verbatim inside
//! [`ErrorShape`](crate::ErrorShape); the ones below are produced on the
//! client side when no server response exists.

/// Socket-level failure while opening or using the connection.
pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";
/// The gateway refused the `connect` handshake.
pub const HANDSHAKE_REJECTED: &str = "HANDSHAKE_REJECTED";
/// A handshake or heartbeat probe was not answered in time.
pub const TIMEOUT: &str = "TIMEOUT";
/// The connection dropped while the request was awaiting its response.
pub const CONNECTION_LOST: &str = "CONNECTION_LOST";
/// The client was shut down.
pub const CLIENT_SHUT_DOWN: &str = "CLIENT_SHUT_DOWN";
/// Neither a token nor a password is configured.
pub const MISSING_CREDENTIALS: &str = "MISSING_CREDENTIALS";
/// A frame could not be encoded or a payload had an unexpected shape.
pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
/// Fallback for a failed response that carried no error body.
pub const UNKNOWN: &str = "UNKNOWN";
