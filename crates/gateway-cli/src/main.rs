//! # gatewayctl
//!
//! Command-line consumer of the gateway client: one-shot calls, event
//! watching and streamed chat.

#![deny(unsafe_code)]

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gateway_client::{ClientConfig, GatewayClient};
use gateway_settings::GatewaySettings;

/// Talk to the gateway control plane.
#[derive(Parser, Debug)]
#[command(name = "gatewayctl", version, about = "Talk to the gateway control plane")]
struct Cli {
    /// Gateway WebSocket URL (overrides settings and `GATEWAY_URL`).
    #[arg(long, global = true)]
    url: Option<String>,

    /// Bearer token (overrides settings and `GATEWAY_TOKEN`).
    #[arg(long, global = true)]
    token: Option<String>,

    /// Shared password (overrides settings and `GATEWAY_PASSWORD`).
    #[arg(long, global = true)]
    password: Option<String>,

    /// Settings file (defaults to `~/.gateway/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Time a `health` round trip.
    Ping,
    /// List available models.
    Models,
    /// Invoke an arbitrary method and print its payload.
    Call {
        /// Method name, e.g. `sessions.list`.
        method: String,
        /// Parameters as a JSON object.
        #[arg(long)]
        params: Option<String>,
    },
    /// Print inbound events until interrupted.
    Watch {
        /// Only print events with this name.
        #[arg(long)]
        event: Option<String>,
    },
    /// Send a chat message and stream the reply.
    Chat {
        /// Session key to post into.
        #[arg(long)]
        session: String,
        /// Message text.
        message: String,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<GatewaySettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(gateway_settings::settings_path);
        let mut settings = gateway_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(url) = &self.url {
            settings.url.clone_from(url);
        }
        if let Some(token) = &self.token {
            settings.token = Some(token.clone());
        }
        if let Some(password) = &self.password {
            settings.password = Some(password.clone());
        }
        settings.validate().context("Invalid gateway settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    gateway_core::logging::init_subscriber(&cli.log_level);

    let settings = cli.load_settings()?;
    anyhow::ensure!(
        settings.has_credentials(),
        "no gateway credentials: pass --token or --password, or set GATEWAY_TOKEN / GATEWAY_PASSWORD"
    );
    let client = GatewayClient::new(ClientConfig::from(&settings));
    tracing::debug!(url = %settings.url, instance_id = %client.instance_id(), "client created");

    let outcome = match cli.command {
        Command::Ping => commands::ping(&client).await,
        Command::Models => commands::models(&client).await,
        Command::Call { method, params } => commands::call(&client, &method, params.as_deref()).await,
        Command::Watch { event } => commands::watch(&client, event.as_deref()).await,
        Command::Chat { session, message } => commands::chat(&client, &session, &message).await,
    };

    client.shutdown().await;
    outcome
}
