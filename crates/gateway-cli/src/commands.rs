//! Subcommand implementations.

use std::io::Write as _;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use gateway_client::{EventFrame, GatewayClient};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Upper bound for one-shot calls, connection included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Overall budget for a streamed chat reply.
const CHAT_TIMEOUT: Duration = Duration::from_secs(180);

async fn connect(client: &GatewayClient) -> Result<()> {
    tokio::time::timeout(REQUEST_TIMEOUT, client.ensure_connected())
        .await
        .map_err(|_| anyhow!("gateway unreachable after {}s", REQUEST_TIMEOUT.as_secs()))?
        .context("Failed to connect to gateway")
}

async fn request(client: &GatewayClient, method: &str, params: Option<Value>) -> Result<Value> {
    tokio::time::timeout(REQUEST_TIMEOUT, client.request(method, params))
        .await
        .map_err(|_| {
            anyhow!(
                "{method} timed out after {}s (client {})",
                REQUEST_TIMEOUT.as_secs(),
                client.state()
            )
        })?
        .with_context(|| format!("{method} failed"))
}

pub async fn ping(client: &GatewayClient) -> Result<()> {
    connect(client).await?;
    let started = Instant::now();
    let payload = request(client, "health", None).await?;
    println!("pong in {}ms", started.elapsed().as_millis());
    if !payload.is_null() {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    }
    Ok(())
}

pub async fn models(client: &GatewayClient) -> Result<()> {
    connect(client).await?;
    let payload = request(client, "models.list", None).await?;
    let lines = model_lines(&payload);
    if lines.is_empty() {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

pub async fn call(client: &GatewayClient, method: &str, params: Option<&str>) -> Result<()> {
    let params = params
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--params must be valid JSON")?;
    if let Some(p) = &params {
        anyhow::ensure!(p.is_object(), "--params must be a JSON object");
    }
    connect(client).await?;
    let payload = request(client, method, params).await?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

pub async fn watch(client: &GatewayClient, filter: Option<&str>) -> Result<()> {
    let mut events = client.events();
    if let Err(e) = client.ensure_connected().await {
        warn!(error = %e, "initial connection failed; retrying in the background");
    }
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    if filter.is_none_or(|name| name == event.event) {
                        println!("{}", format_event(&event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => bail!("event stream closed"),
            },
            res = &mut ctrl_c => {
                res.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }
    Ok(())
}

pub async fn chat(client: &GatewayClient, session: &str, message: &str) -> Result<()> {
    let mut events = client.events();
    let mut state = client.subscribe_state();
    connect(client).await?;

    let params = json!({
        "sessionKey": session,
        "message": message,
        "idempotencyKey": uuid::Uuid::now_v7().to_string(),
    });
    let ack = request(client, "chat.send", Some(params)).await?;
    debug!(%ack, "chat.send accepted");

    let deadline = tokio::time::sleep(CHAT_TIMEOUT);
    tokio::pin!(deadline);
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => match chat_step(&event, session) {
                    ChatStep::Ignore => {}
                    ChatStep::Delta(text) => {
                        print!("{text}");
                        stdout.flush()?;
                    }
                    ChatStep::Done => {
                        println!();
                        return Ok(());
                    }
                    ChatStep::Failed(reason) => {
                        println!();
                        bail!("chat run ended: {reason}");
                    }
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "chat stream lagged; output may be incomplete"),
                Err(RecvError::Closed) => bail!("event stream closed"),
            },
            changed = state.changed() => {
                changed.context("client stopped")?;
                let now = state.borrow_and_update().clone();
                if !now.is_authenticated() {
                    println!();
                    bail!("connection lost while streaming ({now})");
                }
            }
            () = &mut deadline => {
                println!();
                bail!("no final reply within {}s", CHAT_TIMEOUT.as_secs());
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ChatStep {
    Ignore,
    Delta(String),
    Done,
    Failed(String),
}

/// Classify an event for the chat stream of `session`.
fn chat_step(event: &EventFrame, session: &str) -> ChatStep {
    let Some(payload) = event.payload.as_ref() else {
        return ChatStep::Ignore;
    };
    if payload.get("sessionKey").and_then(Value::as_str) != Some(session) {
        return ChatStep::Ignore;
    }
    match event.event.as_str() {
        "agent" => {
            if payload.get("stream").and_then(Value::as_str) != Some("assistant") {
                return ChatStep::Ignore;
            }
            payload
                .pointer("/data/delta")
                .and_then(Value::as_str)
                .map_or(ChatStep::Ignore, |delta| ChatStep::Delta(delta.to_owned()))
        }
        "chat" => match payload.get("state").and_then(Value::as_str) {
            Some("final") => ChatStep::Done,
            Some("aborted") => ChatStep::Failed("aborted".into()),
            Some("error") => ChatStep::Failed(
                payload
                    .get("errorMessage")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_owned(),
            ),
            _ => ChatStep::Ignore,
        },
        _ => ChatStep::Ignore,
    }
}

fn format_event(event: &EventFrame) -> String {
    let ts = chrono::Local::now().format("%H:%M:%S%.3f");
    let seq = event.seq.map(|s| format!(" #{s}")).unwrap_or_default();
    let payload = event.payload.as_ref().map(Value::to_string).unwrap_or_default();
    format!("{ts} {}{seq} {payload}", event.event)
}

/// One `provider/id  name` line per model, if the payload has a model list.
fn model_lines(payload: &Value) -> Vec<String> {
    let Some(models) = payload.get("models").and_then(Value::as_array) else {
        return Vec::new();
    };
    models
        .iter()
        .filter_map(|m| {
            let id = m.get("id").and_then(Value::as_str)?;
            let full = match m.get("provider").and_then(Value::as_str) {
                Some(provider) => format!("{provider}/{id}"),
                None => id.to_owned(),
            };
            Some(match m.get("name").and_then(Value::as_str) {
                Some(name) if name != id => format!("{full:<40} {name}"),
                _ => full,
            })
        })
        .collect()
}
