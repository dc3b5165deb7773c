//! Connection manager task.
//!
//! A single task owns the socket, the pending table, the backoff counter and
//! both timers. Everything else talks to it through [`Command`]s, so none of
//! that state needs a lock.
//!
//! ```text
//!   GatewayClient ──Command──► ConnectionTask ◄── socket frames
//!                                  │   ▲
//!                       spawn      │   │  attempt result
//!                                  ▼   │
//!                               open_link (handshake task)
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gateway_core::InstanceId;
use gateway_protocol::{EventFrame, Frame, FrameError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Sleep};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::fanout::EventFanout;
use crate::handshake::{WsStream, duration_ms, open_link};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatSignal};
use crate::pending::{PendingRequest, PendingTable};
use crate::reconnect::Backoff;
use crate::state::{ClientState, ClientStats, advance};

/// How long shutdown waits for the close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type AttemptResult = Result<WsStream, ClientError>;

/// Messages from client handles to the connection task.
pub(crate) enum Command {
    Request(PendingRequest),
    EnsureConnected(oneshot::Sender<Result<(), ClientError>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handles shared between the task and every [`GatewayClient`](crate::GatewayClient).
#[derive(Clone)]
pub(crate) struct Shared {
    pub config: Arc<ClientConfig>,
    pub instance_id: InstanceId,
    pub state: Arc<watch::Sender<ClientState>>,
    pub stats: Arc<ClientStats>,
    pub fanout: Arc<EventFanout>,
}

pub(crate) struct ConnectionTask {
    shared: Shared,
    commands: mpsc::UnboundedReceiver<Command>,
    table: PendingTable,
    backoff: Backoff,
    link: Option<WsStream>,
    heartbeat: Option<HeartbeatMonitor>,
    attempt: Option<JoinHandle<AttemptResult>>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    waiters: Vec<oneshot::Sender<Result<(), ClientError>>>,
}

impl ConnectionTask {
    pub(crate) fn new(shared: Shared, commands: mpsc::UnboundedReceiver<Command>) -> Self {
        Self {
            shared,
            commands,
            table: PendingTable::new(),
            backoff: Backoff::new(),
            link: None,
            heartbeat: None,
            attempt: None,
            reconnect_timer: None,
            waiters: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        info!(url = %self.shared.config.url, instance_id = %self.shared.instance_id, "gateway connection task started");
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown(done)) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        debug!("all client handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                outcome = join_attempt(&mut self.attempt) => {
                    self.attempt = None;
                    self.on_attempt_finished(outcome).await;
                }
                () = wait_timer(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    debug!(attempt = self.backoff.attempt(), "reconnect timer fired");
                    self.start_attempt();
                }
                msg = next_message(&mut self.link) => self.on_message(msg),
                signal = next_heartbeat(&mut self.heartbeat) => self.on_heartbeat(signal).await,
            }
        }
        info!("gateway connection task stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Request(request) => {
                debug!(request_id = %request.id(), method = request.method(), "request queued");
                self.table.enqueue(request);
                if self.link.is_some() {
                    self.flush().await;
                } else if self.attempt.is_none() && self.reconnect_timer.is_none() {
                    self.start_attempt();
                }
            }
            Command::EnsureConnected(reply) => {
                if self.link.is_some() {
                    let _ = reply.send(Ok(()));
                    return;
                }
                self.waiters.push(reply);
                if self.attempt.is_none() {
                    self.reconnect_timer = None;
                    self.start_attempt();
                }
            }
            Command::Shutdown(_) => {}
        }
    }

    fn start_attempt(&mut self) {
        if self.attempt.is_some() || self.link.is_some() {
            return;
        }
        debug!(url = %self.shared.config.url, "starting connection attempt");
        self.attempt = Some(tokio::spawn(open_link(
            self.shared.config.clone(),
            self.shared.instance_id.clone(),
            self.shared.state.clone(),
        )));
    }

    async fn on_attempt_finished(&mut self, outcome: Result<AttemptResult, JoinError>) {
        let result = outcome.unwrap_or_else(|e| Err(ClientError::transport(format!("connection task failed: {e}"))));
        match result {
            Ok(ws) => {
                self.link = Some(ws);
                self.backoff.reset();
                self.heartbeat = Some(HeartbeatMonitor::new(
                    self.shared.config.heartbeat_interval,
                    self.shared.config.heartbeat_timeout,
                ));
                self.shared.stats.record_connection_opened();
                advance(&self.shared.state, ClientState::Authenticated);
                info!(queued = self.table.queued_len(), "gateway connection authenticated");
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                self.flush().await;
            }
            Err(err) => {
                self.shared.stats.record_failed_attempt();
                warn!(error = %err, queued = self.table.queued_len(), "gateway connection attempt failed");
                self.schedule_reconnect();
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
        }
    }

    /// Arm the reconnect timer unless a timer, an attempt or a link exists.
    fn schedule_reconnect(&mut self) {
        if self.reconnect_timer.is_some() || self.attempt.is_some() || self.link.is_some() {
            return;
        }
        let delay = self.backoff.next_delay(&self.shared.config.reconnect);
        let attempt = self.backoff.attempt();
        self.reconnect_timer = Some(Box::pin(time::sleep(delay)));
        advance(&self.shared.state, ClientState::Reconnecting { attempt, delay });
        info!(attempt, delay_ms = duration_ms(delay), "reconnect scheduled");
    }

    /// Write queued requests in FIFO order while the link is up.
    async fn flush(&mut self) {
        while let Some(ws) = self.link.as_mut() {
            let Some(request) = self.table.pop_queued() else {
                break;
            };
            if request.is_abandoned() {
                debug!(request_id = %request.id(), method = request.method(), "discarding abandoned request");
                continue;
            }
            let text = match Frame::from(request.frame.clone()).encode() {
                Ok(text) => text,
                Err(e) => {
                    request.complete(Err(ClientError::Protocol(e.to_string())));
                    continue;
                }
            };
            match ws.send(Message::Text(text.into())).await {
                Ok(()) => {
                    debug!(request_id = %request.id(), method = request.method(), "request sent");
                    self.table.mark_in_flight(request);
                }
                Err(e) => {
                    let err = ClientError::transport(e);
                    request.complete(Err(err.as_lost()));
                    self.teardown(&err);
                }
            }
        }
    }

    fn on_message(&mut self, msg: Option<Result<Message, tungstenite::Error>>) {
        match msg {
            Some(Ok(Message::Text(text))) => self.route(Frame::decode(&text)),
            Some(Ok(Message::Binary(bytes))) => self.route(Frame::decode_bytes(&bytes)),
            Some(Ok(Message::Pong(_))) => {
                if let Some(heartbeat) = self.heartbeat.as_mut() {
                    heartbeat.acknowledge();
                }
            }
            Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by gateway".into());
                self.teardown(&ClientError::ConnectionLost { reason });
            }
            Some(Err(e)) => self.teardown(&ClientError::transport(e)),
            None => self.teardown(&ClientError::ConnectionLost {
                reason: "socket closed".into(),
            }),
        }
    }

    fn route(&mut self, decoded: Result<Frame, FrameError>) {
        match decoded {
            Ok(Frame::Response(res)) => {
                let id = res.id.clone();
                let result = res.into_result().map_err(ClientError::remote);
                if !self.table.resolve(&id, result) {
                    self.shared.stats.record_unmatched_response();
                    debug!(request_id = %id, "dropping response with no matching request");
                }
            }
            Ok(Frame::Event(event)) => self.dispatch(&event),
            Ok(Frame::Request(req)) => {
                self.shared.stats.record_dropped_frame();
                debug!(method = %req.method, "ignoring gateway-initiated request");
            }
            Err(e) => {
                self.shared.stats.record_dropped_frame();
                debug!(error = %e, "dropping undecodable frame");
            }
        }
    }

    fn dispatch(&self, event: &EventFrame) {
        let delivered = self.shared.fanout.dispatch(event);
        debug!(event = %event.event, seq = ?event.seq, delivered, "event dispatched");
    }

    async fn on_heartbeat(&mut self, signal: HeartbeatSignal) {
        match signal {
            HeartbeatSignal::SendProbe => {
                let Some(ws) = self.link.as_mut() else {
                    return;
                };
                if let Err(e) = ws.send(Message::Ping(Vec::new().into())).await {
                    self.teardown(&ClientError::transport(e));
                }
            }
            HeartbeatSignal::Dead => {
                self.shared.stats.record_heartbeat_timeout();
                let timeout = self.shared.config.heartbeat_timeout;
                warn!(timeout_ms = duration_ms(timeout), "heartbeat probe unanswered");
                self.teardown(&ClientError::Timeout {
                    timeout_ms: duration_ms(timeout),
                    context: "heartbeat pong".into(),
                });
            }
        }
    }

    /// Drop the authenticated link and reject what was in flight on it.
    ///
    /// Queued requests stay queued for the next connection. A second call
    /// for the same link is a no-op.
    fn teardown(&mut self, cause: &ClientError) {
        if self.link.take().is_none() {
            return;
        }
        self.heartbeat = None;
        let rejected = self.table.fail_in_flight(&cause.as_lost());
        self.shared.stats.record_connection_lost();
        warn!(
            error = %cause,
            rejected,
            queued = self.table.queued_len(),
            "gateway connection lost"
        );
        advance(&self.shared.state, ClientState::Disconnected);
        self.schedule_reconnect();
    }

    async fn shutdown(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        self.reconnect_timer = None;
        self.heartbeat = None;
        if let Some(mut ws) = self.link.take() {
            let _ = time::timeout(CLOSE_GRACE, ws.close(None)).await;
        }

        let err = ClientError::ClientShutDown;
        let rejected = self.table.fail_all(&err);
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }

        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::Request(request) => request.complete(Err(err.clone())),
                Command::EnsureConnected(reply) => {
                    let _ = reply.send(Err(err.clone()));
                }
                Command::Shutdown(done) => {
                    let _ = done.send(());
                }
            }
        }

        let _ = self.shared.state.send_replace(ClientState::Destroyed);
        info!(rejected, "gateway client shut down");
    }
}

async fn join_attempt(attempt: &mut Option<JoinHandle<AttemptResult>>) -> Result<AttemptResult, JoinError> {
    match attempt {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_message(link: &mut Option<WsStream>) -> Option<Result<Message, tungstenite::Error>> {
    match link {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn next_heartbeat(heartbeat: &mut Option<HeartbeatMonitor>) -> HeartbeatSignal {
    match heartbeat {
        Some(monitor) => monitor.next_signal().await,
        None => std::future::pending().await,
    }
}
