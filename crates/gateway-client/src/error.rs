//! Client error taxonomy.

use gateway_protocol::{ErrorShape, codes};
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by [`GatewayClient`](crate::GatewayClient).
///
/// `Clone` so a single failed connection attempt can be reported to every
/// caller waiting on it.
#[derive(Clone, Debug, Error)]
pub enum ClientError {
    /// Socket-level failure before or during use.
    #[error("transport error: {message}")]
    Transport {
        /// What went wrong.
        message: String,
    },

    /// The gateway explicitly refused the `connect` request.
    #[error("handshake rejected: {code}: {message}")]
    HandshakeRejected {
        /// Server error code.
        code: String,
        /// Server message.
        message: String,
        /// Server details.
        details: Option<Value>,
    },

    /// A handshake or heartbeat probe was not answered in time.
    #[error("timed out after {timeout_ms}ms: {context}")]
    Timeout {
        /// How long we waited.
        timeout_ms: u64,
        /// What we were waiting for.
        context: String,
    },

    /// The connection dropped while the request was in flight.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Why the connection went away.
        reason: String,
    },

    /// The client was shut down.
    #[error("client shut down")]
    ClientShutDown,

    /// The gateway answered the request with `ok: false`.
    #[error("{code}: {message}")]
    Remote {
        /// Server error code, verbatim.
        code: String,
        /// Server message, verbatim.
        message: String,
        /// Server details, verbatim.
        details: Option<Value>,
    },

    /// Neither a token nor a password is configured.
    #[error("no gateway credentials configured (set a token or a password)")]
    MissingCredentials,

    /// A frame could not be encoded, or a payload had an unexpected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Machine-readable error code.
    pub fn code(&self) -> &str {
        match self {
            Self::Transport { .. } => codes::TRANSPORT_ERROR,
            Self::HandshakeRejected { .. } => codes::HANDSHAKE_REJECTED,
            Self::Timeout { .. } => codes::TIMEOUT,
            Self::ConnectionLost { .. } => codes::CONNECTION_LOST,
            Self::ClientShutDown => codes::CLIENT_SHUT_DOWN,
            Self::Remote { code, .. } => code,
            Self::MissingCredentials => codes::MISSING_CREDENTIALS,
            Self::Protocol(_) => codes::PROTOCOL_ERROR,
        }
    }

    /// Whether this error ended the connection it occurred on.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::HandshakeRejected { .. }
                | Self::Timeout { .. }
                | Self::ConnectionLost { .. }
        )
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }

    pub(crate) fn handshake_rejected(shape: ErrorShape) -> Self {
        Self::HandshakeRejected {
            code: shape.code,
            message: shape.message,
            details: shape.details,
        }
    }

    pub(crate) fn remote(shape: ErrorShape) -> Self {
        Self::Remote {
            code: shape.code,
            message: shape.message,
            details: shape.details,
        }
    }

    /// Reason used when tearing down a connection because of this error.
    pub(crate) fn as_lost(&self) -> Self {
        match self {
            Self::ConnectionLost { .. } => self.clone(),
            other => Self::ConnectionLost {
                reason: other.to_string(),
            },
        }
    }
}
