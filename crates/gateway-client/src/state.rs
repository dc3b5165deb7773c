//! Observable lifecycle state and counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;

/// Lifecycle of a [`GatewayClient`](crate::GatewayClient).
///
/// `Destroyed` is terminal and reachable from every other state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// No socket and no attempt in progress.
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Socket open, `connect` request sent.
    Handshaking,
    /// Handshake accepted; requests are flowing.
    Authenticated,
    /// Waiting before the next attempt.
    Reconnecting {
        /// Consecutive failures so far.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Shut down for good.
    Destroyed,
}

impl ClientState {
    /// Whether requests are currently written straight to the socket.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    /// Whether the client has been shut down.
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Handshaking => f.write_str("handshaking"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {attempt}, in {}ms)", delay.as_millis())
            }
            Self::Destroyed => f.write_str("destroyed"),
        }
    }
}

/// Publish a transition unless the client is already destroyed.
pub(crate) fn advance(state: &watch::Sender<ClientState>, next: ClientState) {
    let _ = state.send_if_modified(|current| {
        if current.is_destroyed() || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Monotonic counters for conditions the client tolerates silently.
#[derive(Debug, Default)]
pub struct ClientStats {
    dropped_frames: AtomicU64,
    unmatched_responses: AtomicU64,
    connections_opened: AtomicU64,
    failed_attempts: AtomicU64,
    connections_lost: AtomicU64,
    heartbeat_timeouts: AtomicU64,
}

/// Point-in-time copy of [`ClientStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Inbound messages that were not a decodable frame, or were requests.
    pub dropped_frames: u64,
    /// Responses whose id matched nothing in flight.
    pub unmatched_responses: u64,
    /// Handshakes that succeeded.
    pub connections_opened: u64,
    /// Connection attempts that failed.
    pub failed_attempts: u64,
    /// Authenticated connections that were torn down.
    pub connections_lost: u64,
    /// Connections declared dead by the heartbeat.
    pub heartbeat_timeouts: u64,
}

impl ClientStats {
    pub(crate) fn record_dropped_frame(&self) {
        let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmatched_response(&self) {
        let _ = self.unmatched_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connection_opened(&self) {
        let _ = self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_attempt(&self) {
        let _ = self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connection_lost(&self) {
        let _ = self.connections_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_heartbeat_timeout(&self) {
        let _ = self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            connections_lost: self.connections_lost.load(Ordering::Relaxed),
            heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
        }
    }
}
