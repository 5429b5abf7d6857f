//! # taskcast
//!
//! Broker binary: loads settings, starts the HTTP/WebSocket server and runs
//! until ctrl-c.

#![deny(unsafe_code)]

mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use taskcast_broker::BrokerRegistry;
use taskcast_server::{DrainOutcome, ServerConfig, TaskcastServer};
use taskcast_settings::{load_settings_from_path, settings_path, TaskcastSettings};

/// How long sessions get to wind down after ctrl-c.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// In-memory task broker.
#[derive(Parser, Debug)]
#[command(name = "taskcast", about = "In-memory task broker")]
struct Cli {
    /// Settings file (defaults to `~/.taskcast/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

/// Settings from file and env, with CLI flags applied last.
fn resolve_settings(cli: &Cli) -> Result<TaskcastSettings> {
    let path = cli.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    settings.validate().context("Invalid settings after CLI overrides")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;
    logging::init_logging(&settings.logging);

    let registry = Arc::new(BrokerRegistry::new());
    let server = TaskcastServer::new(ServerConfig::from(&settings.server), registry);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    tracing::info!("taskcast listening on http://{addr} (ws://{addr}/ws)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!(connections = server.connection_count(), "Shutting down...");
    match server.shutdown().drain(handle, SHUTDOWN_GRACE).await {
        DrainOutcome::Complete => tracing::info!("Shutdown complete"),
        DrainOutcome::TimedOut { sessions_left } => {
            tracing::warn!(sessions_left, "Shutdown finished with sessions still open");
        }
    }
    Ok(())
}
