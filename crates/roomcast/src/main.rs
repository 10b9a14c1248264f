//! # roomcast
//!
//! Gateway binary: loads settings, starts logging and metrics, and serves
//! chat rooms at `/rooms/{room}/ws` until interrupted.

#![deny(unsafe_code)]

mod chat;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use roomcast_server::{PresenceHooks, RoomDefinition, RoomcastServer, ServerConfig};
use roomcast_settings::RoomcastSettings;

/// How long open sockets get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Roomcast gateway.
#[derive(Parser, Debug)]
#[command(name = "roomcast", about = "Realtime room gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve rooms until interrupted.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, `0` for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Maximum sockets per room (overrides settings).
    #[arg(long)]
    max_connections: Option<usize>,

    /// Settings file (defaults to `~/.roomcast/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Do not install the Prometheus recorder.
    #[arg(long)]
    no_metrics: bool,
}

impl ServeArgs {
    /// Gateway config from settings, with command-line overrides applied.
    fn server_config(&self, settings: &RoomcastSettings) -> ServerConfig {
        let mut config = ServerConfig::from(&settings.server);
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        config
    }
}

fn load_settings(args: &ServeArgs) -> Result<RoomcastSettings> {
    let path = args
        .settings
        .clone()
        .unwrap_or_else(roomcast_settings::settings_path);
    roomcast_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn build_server(config: ServerConfig) -> RoomcastServer {
    RoomcastServer::new(config, RoomDefinition::new(chat::chat_events(), PresenceHooks))
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let settings = load_settings(&args)?;

    if args.json_logs || settings.logging.json {
        roomcast_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        roomcast_core::logging::init_subscriber(&settings.logging.level);
    }

    let mut server = build_server(args.server_config(&settings));
    if !args.no_metrics {
        let handle = roomcast_server::metrics::install_recorder()
            .context("Failed to install metrics recorder")?;
        server = server.with_metrics(handle);
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        max_connections = server.config().max_connections,
        "Roomcast listening on ws://{addr}/rooms/{{room}}/ws"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let drained = server.shutdown().drain(Some(DRAIN_TIMEOUT)).await;
    if !drained {
        tracing::warn!("sockets still open after drain timeout");
    }
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
