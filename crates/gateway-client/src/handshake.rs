//! One connection attempt: open the socket and authenticate.
//!
//! Runs as its own task so the connection manager keeps serving commands
//! while the attempt is in flight. The manager aborts the task on shutdown.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gateway_core::InstanceId;
use gateway_protocol::{CONNECT_METHOD, ConnectParams, Frame, RequestFrame};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::state::{ClientState, advance};

/// Authenticated socket handed back to the connection manager.
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Open and authenticate a new socket.
///
/// Fails before touching the network when no credential is configured. The
/// whole exchange, socket open included, is bounded by the configured
/// handshake timeout.
pub(crate) async fn open_link(
    config: Arc<ClientConfig>,
    instance_id: InstanceId,
    state: Arc<watch::Sender<ClientState>>,
) -> Result<WsStream, ClientError> {
    let params = config.connect_params(&instance_id)?;
    let budget = config.handshake_timeout;
    time::timeout(budget, authenticate(&config.url, params, &state))
        .await
        .map_err(|_| ClientError::Timeout {
            timeout_ms: duration_ms(budget),
            context: "connect handshake".into(),
        })?
}

async fn authenticate(
    url: &str,
    params: ConnectParams,
    state: &watch::Sender<ClientState>,
) -> Result<WsStream, ClientError> {
    advance(state, ClientState::Connecting);
    let (mut ws, _) = connect_async(url).await.map_err(ClientError::transport)?;

    advance(state, ClientState::Handshaking);
    let params = serde_json::to_value(&params).map_err(|e| ClientError::Protocol(e.to_string()))?;
    let request = RequestFrame::new(CONNECT_METHOD, Some(params));
    let connect_id = request.id.clone();
    let text = Frame::from(request)
        .encode()
        .map_err(|e| ClientError::Protocol(e.to_string()))?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(ClientError::transport)?;

    loop {
        let decoded = match ws.next().await {
            Some(Ok(Message::Text(text))) => Frame::decode(&text),
            Some(Ok(Message::Binary(bytes))) => Frame::decode_bytes(&bytes),
            Some(Ok(Message::Close(_))) | None => {
                return Err(ClientError::transport("gateway closed the socket during handshake"));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ClientError::transport(e)),
        };
        match decoded {
            Ok(Frame::Response(res)) if res.id == connect_id => {
                return match res.into_result() {
                    Ok(_) => Ok(ws),
                    Err(shape) => Err(ClientError::handshake_rejected(shape)),
                };
            }
            Ok(other) => debug!(kind = other.kind(), "ignoring frame received before handshake completed"),
            Err(e) => debug!(error = %e, "dropping undecodable frame during handshake"),
        }
    }
}
