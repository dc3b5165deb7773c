//! End-to-end tests against an in-process mock gateway.
//!
//! The mock accepts real WebSocket connections and hands each one to the
//! test body, which plays the gateway side frame by frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use gateway_client::{
    ClientConfig, ClientError, ClientState, ErrorShape, EventFrame, EventSubscription, Frame,
    GatewayClient, ReconnectPolicy,
};
use gateway_protocol::{RequestFrame, ResponseFrame};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

// ── mock gateway ────────────────────────────────────────────────────

struct MockGateway {
    url: String,
    accepted: mpsc::UnboundedReceiver<ServerConn>,
    connections: Arc<AtomicUsize>,
}

struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl MockGateway {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, accepted) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        let _accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
                let Ok(ws) = accept_async(stream).await else { continue };
                if tx.send(ServerConn { ws }).is_err() {
                    break;
                }
            }
        });
        Self {
            url,
            accepted,
            connections,
        }
    }

    async fn next_conn(&mut self) -> ServerConn {
        timeout(TIMEOUT, self.accepted.recv())
            .await
            .expect("no connection within timeout")
            .expect("accept loop stopped")
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl ServerConn {
    async fn recv_frame(&mut self) -> Frame {
        loop {
            let msg = timeout(TIMEOUT, self.ws.next())
                .await
                .expect("no frame within timeout")
                .expect("client closed the socket")
                .expect("socket error");
            match msg {
                Message::Text(text) => return Frame::decode(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    async fn recv_request(&mut self) -> RequestFrame {
        match self.recv_frame().await {
            Frame::Request(req) => req,
            other => panic!("expected request, got: {other:?}"),
        }
    }

    /// Read the `connect` request and accept it.
    async fn accept_handshake(&mut self) -> RequestFrame {
        let hello = self.recv_request().await;
        assert_eq!(hello.method, "connect");
        self.send(ResponseFrame::success(hello.id.clone(), Some(json!({"protocol": 3}))))
            .await;
        hello
    }

    async fn reject_handshake(&mut self, code: &str, message: &str) {
        let hello = self.recv_request().await;
        assert_eq!(hello.method, "connect");
        self.send(ResponseFrame::failure(hello.id, ErrorShape::new(code, message)))
            .await;
    }

    async fn respond(&mut self, req: &RequestFrame, payload: Value) {
        self.send(ResponseFrame::success(req.id.clone(), Some(payload)))
            .await;
    }

    async fn send(&mut self, frame: impl Into<Frame>) {
        let text = frame.into().encode().unwrap();
        self.send_raw(&text).await;
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_owned().into())).await.unwrap();
    }

    async fn assert_silent(&mut self) {
        assert!(
            timeout(QUIET, self.recv_frame()).await.is_err(),
            "client sent an unexpected frame"
        );
    }

    /// Keep reading in the background so pings are answered.
    fn keep_alive(mut self) -> JoinHandle<()> {
        tokio::spawn(async move { while let Some(Ok(_)) = self.ws.next().await {} })
    }
}

fn config(url: &str) -> ClientConfig {
    ClientConfig {
        url: url.into(),
        token: Some("secret".into()),
        handshake_timeout: Duration::from_secs(2),
        reconnect: ReconnectPolicy::from_millis(&[50, 100, 200], 1000),
        ..ClientConfig::default()
    }
}

async fn wait_for_state(client: &GatewayClient, target: ClientState) {
    let mut rx = client.subscribe_state();
    let _ = timeout(TIMEOUT, rx.wait_for(|s| *s == target))
        .await
        .expect("state not reached within timeout")
        .unwrap();
}

async fn connected(gw: &mut MockGateway, client: &GatewayClient) -> ServerConn {
    let (result, conn) = tokio::join!(client.ensure_connected(), async {
        let mut conn = gw.next_conn().await;
        let _ = conn.accept_handshake().await;
        conn
    });
    result.unwrap();
    conn
}

fn spawn_request(
    client: &GatewayClient,
    method: &str,
    params: Option<Value>,
) -> JoinHandle<Result<Value, ClientError>> {
    let client = client.clone();
    let method = method.to_owned();
    tokio::spawn(async move { client.request(method, params).await })
}

async fn join(handle: JoinHandle<Result<Value, ClientError>>) -> Result<Value, ClientError> {
    timeout(TIMEOUT, handle)
        .await
        .expect("request did not settle")
        .unwrap()
}

// ── handshake ───────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_carries_identity_and_credentials() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(config(&gw.url));

    let (result, hello) = tokio::join!(client.ensure_connected(), async {
        let mut conn = gw.next_conn().await;
        let hello = conn.accept_handshake().await;
        (hello, conn)
    });
    result.unwrap();
    let (hello, _conn) = hello;

    let params = hello.params.unwrap();
    assert_eq!(params["auth"]["token"], "secret");
    assert_eq!(params["client"]["id"], "operator-console");
    assert_eq!(params["client"]["instanceId"], client.instance_id().as_str());
    assert_eq!(params["minProtocol"], 3);
    assert_eq!(client.state(), ClientState::Authenticated);
    assert_eq!(client.stats().connections_opened, 1);
    client.shutdown().await;
}

#[tokio::test]
async fn rejected_handshake_is_reported_and_retried() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(ClientConfig {
        reconnect: ReconnectPolicy::from_millis(&[1000], 5000),
        ..config(&gw.url)
    });

    let (result, ()) = tokio::join!(client.ensure_connected(), async {
        gw.next_conn()
            .await
            .reject_handshake("UNAUTHORIZED", "bad token")
            .await;
    });
    assert_matches!(
        result,
        Err(ClientError::HandshakeRejected { ref code, ref message, .. })
            if code == "UNAUTHORIZED" && message == "bad token"
    );
    assert_eq!(
        client.state(),
        ClientState::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(1000)
        }
    );
    client.shutdown().await;
}

#[tokio::test]
async fn missing_credentials_never_open_a_socket() {
    let gw = MockGateway::start().await;
    let client = GatewayClient::new(ClientConfig {
        token: None,
        password: Some(String::new()),
        ..config(&gw.url)
    });

    assert_matches!(client.ensure_connected().await, Err(ClientError::MissingCredentials));
    tokio::time::sleep(QUIET).await;
    assert_eq!(gw.connections(), 0);
    client.shutdown().await;
}

#[tokio::test]
async fn first_attempt_failure_schedules_one_retry_at_min_delay() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = GatewayClient::new(ClientConfig {
        reconnect: ReconnectPolicy::from_millis(&[1000, 2000], 5000),
        ..config(&format!("ws://127.0.0.1:{port}"))
    });

    assert_matches!(client.ensure_connected().await, Err(ClientError::Transport { .. }));
    assert_eq!(
        client.state(),
        ClientState::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(1000)
        }
    );
    let stats = client.stats();
    assert_eq!(stats.failed_attempts, 1);
    assert_eq!(stats.connections_lost, 0);
    client.shutdown().await;
}

// ── idempotent connect ──────────────────────────────────────────────

#[tokio::test]
async fn authenticated_link_resets_backoff_for_next_loss() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(ClientConfig {
        reconnect: ReconnectPolicy::from_millis(&[300, 400], 1000),
        ..config(&gw.url)
    });

    let (result, ()) = tokio::join!(client.ensure_connected(), async {
        gw.next_conn().await.reject_handshake("UNAUTHORIZED", "not yet").await;
    });
    assert_matches!(result, Err(ClientError::HandshakeRejected { .. }));

    gw.next_conn().await.reject_handshake("UNAUTHORIZED", "not yet").await;
    wait_for_state(
        &client,
        ClientState::Reconnecting {
            attempt: 2,
            delay: Duration::from_millis(400),
        },
    )
    .await;

    let mut conn = gw.next_conn().await;
    let _ = conn.accept_handshake().await;
    wait_for_state(&client, ClientState::Authenticated).await;

    conn.ws.close(None).await.unwrap();
    drop(conn);
    wait_for_state(
        &client,
        ClientState::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(300),
        },
    )
    .await;

    let stats = client.stats();
    assert_eq!(stats.failed_attempts, 2);
    assert_eq!(stats.connections_opened, 1);
    assert_eq!(stats.connections_lost, 1);
    client.shutdown().await;
}

#[tokio::test]
async fn concurrent_ensure_connected_opens_one_socket() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(config(&gw.url));

    let (a, b, _conn) = tokio::join!(client.ensure_connected(), client.ensure_connected(), async {
        let mut conn = gw.next_conn().await;
        let _ = conn.accept_handshake().await;
        conn
    });
    a.unwrap();
    b.unwrap();

    client.ensure_connected().await.unwrap();
    tokio::time::sleep(QUIET).await;
    assert_eq!(gw.connections(), 1);
    assert_eq!(client.stats().connections_opened, 1);
    client.shutdown().await;
}

// ── correlation and queueing ────────────────────────────────────────

#[tokio::test]
async fn responses_are_matched_by_id_not_order() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(config(&gw.url));
    let mut conn = connected(&mut gw, &client).await;

    let a = spawn_request(&client, "sessions.get", Some(json!({"key": "a"})));
    let ra = conn.recv_request().await;
    let b = spawn_request(&client, "sessions.get", Some(json!({"key": "b"})));
    let rb = conn.recv_request().await;
    assert_ne!(ra.id, rb.id);

    conn.respond(&rb, json!({"key": "b"})).await;
    conn.respond(&ra, json!({"key": "a"})).await;

    assert_eq!(join(a).await.unwrap(), json!({"key": "a"}));
    assert_eq!(join(b).await.unwrap(), json!({"key": "b"}));
    client.shutdown().await;
}

#[tokio::test]
async fn requests_issued_while_disconnected_flush_in_order_exactly_once() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(config(&gw.url));

    let a = spawn_request(&client, "ping", None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let b = spawn_request(&client, "models.list", None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_ne!(client.state(), ClientState::Authenticated);

    let mut conn = gw.next_conn().await;
    let _ = conn.accept_handshake().await;
    let first = conn.recv_request().await;
    let second = conn.recv_request().await;
    assert_eq!(first.method, "ping");
    assert_eq!(second.method, "models.list");

    conn.respond(&second, json!({"models": ["m1"]})).await;
    conn.respond(&first, json!({"pong": true})).await;

    assert_eq!(join(b).await.unwrap(), json!({"models": ["m1"]}));
    assert_eq!(join(a).await.unwrap(), json!({"pong": true}));
    conn.assert_silent().await;
    assert_eq!(gw.connections(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn remote_error_only_affects_its_own_request() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(config(&gw.url));
    let mut conn = connected(&mut gw, &client).await;

    let bad = spawn_request(&client, "sessions.get", Some(json!({"key": "missing"})));
    let r_bad = conn.recv_request().await;
    let good = spawn_request(&client, "health", None);
    let r_good = conn.recv_request().await;

    conn.send(ResponseFrame::failure(
        r_bad.id.clone(),
        ErrorShape::new("SESSION_NOT_FOUND", "no such session").with_details(json!({"key": "missing"})),
    ))
    .await;
    conn.respond(&r_good, json!({"ok": true})).await;

    assert_matches!(
        join(bad).await,
        Err(ClientError::Remote { ref code, ref message, ref details })
            if code == "SESSION_NOT_FOUND"
                && message == "no such session"
                && *details == Some(json!({"key": "missing"}))
    );
    assert_eq!(join(good).await.unwrap(), json!({"ok": true}));
    assert_eq!(client.state(), ClientState::Authenticated);
    assert_eq!(client.stats().connections_lost, 0);
    client.shutdown().await;
}

#[tokio::test]
async fn noise_frames_are_dropped_and_counted() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(config(&gw.url));
    let mut conn = connected(&mut gw, &client).await;

    let pending = spawn_request(&client, "health", None);
    let req = conn.recv_request().await;

    conn.send_raw("not json at all").await;
    conn.send_raw(r#"{"type":"mystery","id":"x"}"#).await;
    conn.send(ResponseFrame::success("stale-id".into(), None)).await;
    conn.respond(&req, json!({"status": "ok"})).await;

    assert_eq!(join(pending).await.unwrap(), json!({"status": "ok"}));
    let stats = client.stats();
    assert_eq!(stats.dropped_frames, 2);
    assert_eq!(stats.unmatched_responses, 1);
    assert_eq!(client.state(), ClientState::Authenticated);
    client.shutdown().await;
}

#[derive(Debug, Deserialize, PartialEq)]
struct ModelList {
    models: Vec<String>,
}

#[tokio::test]
async fn typed_call_decodes_payload() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(config(&gw.url));
    let mut conn = connected(&mut gw, &client).await;

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.call::<ModelList>("models.list", None).await })
    };
    let req = conn.recv_request().await;
    conn.respond(&req, json!({"models": ["a", "b"]})).await;
    assert_eq!(
        call.await.unwrap().unwrap(),
        ModelList {
            models: vec!["a".into(), "b".into()]
        }
    );

    let bad = {
        let client = client.clone();
        tokio::spawn(async move { client.call::<ModelList>("models.list", None).await })
    };
    let req = conn.recv_request().await;
    conn.respond(&req, json!({"models": 7})).await;
    assert_matches!(bad.await.unwrap(), Err(ClientError::Protocol(_)));
    client.shutdown().await;
}

// ── connection loss ─────────────────────────────────────────────────

#[tokio::test]
async fn in_flight_rejected_queued_survives_reconnect() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(config(&gw.url));
    let mut conn = connected(&mut gw, &client).await;

    let sent = spawn_request(&client, "chat.send", Some(json!({"message": "hi"})));
    let _ = conn.recv_request().await;
    conn.ws.close(None).await.unwrap();
    drop(conn);

    assert_matches!(join(sent).await, Err(ClientError::ConnectionLost { .. }));

    let queued = spawn_request(&client, "health", None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_ne!(client.state(), ClientState::Authenticated);

    let mut conn = gw.next_conn().await;
    let _ = conn.accept_handshake().await;
    let req = conn.recv_request().await;
    assert_eq!(req.method, "health");
    conn.respond(&req, json!({"status": "ok"})).await;
    assert_eq!(join(queued).await.unwrap(), json!({"status": "ok"}));
    conn.assert_silent().await;

    let stats = client.stats();
    assert_eq!(stats.connections_lost, 1);
    assert_eq!(stats.connections_opened, 2);
    client.shutdown().await;
}

#[tokio::test]
async fn unanswered_heartbeat_tears_down_once_and_reconnects() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(ClientConfig {
        heartbeat_interval: Duration::from_millis(100),
        heartbeat_timeout: Duration::from_millis(100),
        ..config(&gw.url)
    });
    let mut conn = connected(&mut gw, &client).await;

    let in_flight = spawn_request(&client, "agent.wait", None);
    let _ = conn.recv_request().await;
    // stop reading: pings go unanswered

    assert_matches!(
        join(in_flight).await,
        Err(ClientError::ConnectionLost { ref reason }) if reason.contains("heartbeat")
    );

    let mut next = gw.next_conn().await;
    let _ = next.accept_handshake().await;
    let _reader = next.keep_alive();
    wait_for_state(&client, ClientState::Authenticated).await;

    let stats = client.stats();
    assert_eq!(stats.heartbeat_timeouts, 1);
    assert_eq!(stats.connections_lost, 1);
    assert_eq!(stats.connections_opened, 2);
    drop(conn);
    client.shutdown().await;
}

// ── events ──────────────────────────────────────────────────────────

#[tokio::test]
async fn every_listener_gets_each_event_and_unsubscribe_mid_dispatch_is_safe() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(config(&gw.url));
    let mut conn = connected(&mut gw, &client).await;

    let (tx, mut rx) = mpsc::unbounded_channel::<(u8, Option<Value>)>();
    let tx1 = tx.clone();
    let _l1 = client.on_event(move |e: &EventFrame| {
        let _ = tx1.send((1, e.payload.clone()));
    });

    let own_sub: Arc<Mutex<Option<EventSubscription>>> = Arc::new(Mutex::new(None));
    let own = own_sub.clone();
    let tx2 = tx.clone();
    let l2 = client.on_event(move |e: &EventFrame| {
        let _ = tx2.send((2, e.payload.clone()));
        if let Some(sub) = own.lock().take() {
            sub.unsubscribe();
        }
    });
    *own_sub.lock() = Some(l2);

    let tx3 = tx.clone();
    let _l3 = client.on_event(move |e: &EventFrame| {
        let _ = tx3.send((3, e.payload.clone()));
    });

    let payload = json!({"sessionKey": "s1", "stream": "assistant", "delta": "hel"});
    conn.send(EventFrame::new("agent", Some(payload.clone()))).await;

    let mut first = Vec::new();
    for _ in 0..3 {
        first.push(timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap());
    }
    first.sort_by_key(|(who, _)| *who);
    assert_eq!(
        first,
        vec![
            (1, Some(payload.clone())),
            (2, Some(payload.clone())),
            (3, Some(payload.clone()))
        ]
    );

    conn.send(EventFrame::new("agent", Some(json!({"n": 2})))).await;
    let mut second = Vec::new();
    for _ in 0..2 {
        second.push(timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap().0);
    }
    second.sort_unstable();
    assert_eq!(second, vec![1, 3]);
    assert!(timeout(QUIET, rx.recv()).await.is_err());
    client.shutdown().await;
}

#[tokio::test]
async fn event_channel_and_listeners_survive_reconnect() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(config(&gw.url));
    let mut events = client.events();
    let mut conn = connected(&mut gw, &client).await;

    let mut seq_event = EventFrame::new("chat", Some(json!({"state": "delta"})));
    seq_event.seq = Some(7);
    conn.send(seq_event).await;
    let got = timeout(TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(got.event, "chat");
    assert_eq!(got.seq, Some(7));

    conn.ws.close(None).await.unwrap();
    drop(conn);

    let mut conn = gw.next_conn().await;
    let _ = conn.accept_handshake().await;
    wait_for_state(&client, ClientState::Authenticated).await;
    conn.send(EventFrame::new("tick", None)).await;
    let got = timeout(TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(got.event, "tick");
    client.shutdown().await;
}

// ── shutdown ────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_is_final() {
    let mut gw = MockGateway::start().await;
    let client = GatewayClient::new(config(&gw.url));
    let mut conn = connected(&mut gw, &client).await;

    let in_flight = spawn_request(&client, "agent.wait", None);
    let _ = conn.recv_request().await;

    client.shutdown().await;
    assert_matches!(join(in_flight).await, Err(ClientError::ClientShutDown));
    assert_eq!(client.state(), ClientState::Destroyed);
    assert_matches!(client.request("health", None).await, Err(ClientError::ClientShutDown));

    let closed = timeout(TIMEOUT, conn.ws.next()).await.unwrap();
    assert_matches!(closed, None | Some(Ok(Message::Close(_)) | Err(_)));

    tokio::time::sleep(QUIET).await;
    assert_eq!(gw.connections(), 1);
    assert_eq!(client.stats().failed_attempts, 0);
}

#[tokio::test]
async fn shutdown_cancels_pending_reconnect() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = GatewayClient::new(config(&format!("ws://127.0.0.1:{port}")));
    let queued = spawn_request(&client, "health", None);
    let mut state = client.subscribe_state();
    let _ = timeout(TIMEOUT, state.wait_for(|s| matches!(s, ClientState::Reconnecting { .. })))
        .await
        .unwrap()
        .unwrap();

    client.shutdown().await;
    assert_matches!(join(queued).await, Err(ClientError::ClientShutDown));
    let failures = client.stats().failed_attempts;
    tokio::time::sleep(QUIET).await;
    assert_eq!(client.stats().failed_attempts, failures);
    assert_eq!(client.state(), ClientState::Destroyed);
}
