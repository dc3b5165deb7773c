//! Public client handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use gateway_core::InstanceId;
use gateway_protocol::{EventFrame, RequestFrame};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::{Command, ConnectionTask, Shared};
use crate::error::ClientError;
use crate::fanout::{EventFanout, EventSubscription};
use crate::pending::PendingRequest;
use crate::state::{ClientState, ClientStats, StatsSnapshot};

/// Handle to the process-wide gateway connection.
///
/// Cheap to clone; every clone talks to the same connection task. The task
/// stops after [`shutdown`](Self::shutdown) or once every handle is dropped.
#[derive(Clone)]
pub struct GatewayClient {
    commands: mpsc::UnboundedSender<Command>,
    destroyed: Arc<AtomicBool>,
    shared: Shared,
}

impl GatewayClient {
    /// Create a client and spawn its connection task.
    ///
    /// No socket is opened until the first [`request`](Self::request) or
    /// [`ensure_connected`](Self::ensure_connected). Must be called from
    /// within a Tokio runtime.
    pub fn new(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ClientState::Disconnected);
        let shared = Shared {
            config: Arc::new(config),
            instance_id: InstanceId::new(),
            state: Arc::new(state),
            stats: Arc::new(ClientStats::default()),
            fanout: Arc::new(EventFanout::new()),
        };
        let (commands, rx) = mpsc::unbounded_channel();
        let _ = tokio::spawn(ConnectionTask::new(shared.clone(), rx).run());
        Self {
            commands,
            destroyed: Arc::new(AtomicBool::new(false)),
            shared,
        }
    }

    /// Invoke `method` on the gateway and wait for its payload.
    ///
    /// The call is accepted in any state except destroyed: while
    /// disconnected it is queued and written after the next successful
    /// handshake. There is no per-request timeout; race the future against
    /// a timer if one is needed. Dropping the future before the request is
    /// written discards it.
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<Value, ClientError> {
        if self.is_destroyed() {
            return Err(ClientError::ClientShutDown);
        }
        let (tx, rx) = oneshot::channel();
        let frame = RequestFrame::new(method, params);
        self.commands
            .send(Command::Request(PendingRequest::new(frame, tx)))
            .map_err(|_| ClientError::ClientShutDown)?;
        rx.await.map_err(|_| ClientError::ClientShutDown)?
    }

    /// [`request`](Self::request), deserializing the payload into `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let payload = self.request(method, params).await?;
        serde_json::from_value(payload)
            .map_err(|e| ClientError::Protocol(format!("unexpected payload for {method}: {e}")))
    }

    /// Register a listener for every inbound event, across reconnects.
    pub fn on_event<F>(&self, listener: F) -> EventSubscription
    where
        F: Fn(&EventFrame) + Send + Sync + 'static,
    {
        self.shared.fanout.subscribe(listener)
    }

    /// Async stream of inbound events dispatched after this call.
    pub fn events(&self) -> broadcast::Receiver<EventFrame> {
        self.shared.fanout.channel()
    }

    /// Resolve once an authenticated connection exists.
    ///
    /// Joins an attempt already in progress instead of opening a second
    /// socket. A failed attempt is reported here only; queued requests keep
    /// waiting for the next attempt.
    pub async fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.is_destroyed() {
            return Err(ClientError::ClientShutDown);
        }
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::EnsureConnected(tx))
            .map_err(|_| ClientError::ClientShutDown)?;
        rx.await.map_err(|_| ClientError::ClientShutDown)?
    }

    /// Shut the client down for good.
    ///
    /// Cancels any reconnect, closes the socket and rejects every queued and
    /// in-flight request with [`ClientError::ClientShutDown`]. Idempotent.
    pub async fn shutdown(&self) {
        let repeated = self.destroyed.swap(true, Ordering::AcqRel);
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        if repeated {
            debug!("shutdown already requested");
        } else {
            info!(instance_id = %self.shared.instance_id, "gateway client destroyed");
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.shared.state.borrow().clone()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.shared.state.subscribe()
    }

    /// Counters for tolerated anomalies and connection churn.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Per-process instance id sent in every handshake.
    pub fn instance_id(&self) -> &InstanceId {
        &self.shared.instance_id
    }

    /// Effective configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("url", &self.shared.config.url)
            .field("instance_id", &self.shared.instance_id)
            .field("state", &self.state())
            .field("listeners", &self.shared.fanout.listener_count())
            .finish_non_exhaustive()
    }
}
