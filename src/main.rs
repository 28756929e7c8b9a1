//! OpenClaw Launcher - wallet-linked Docker orchestrator
//!
//! Binds wallet public keys to isolated OpenClaw container instances on a
//! single host, exposing lifecycle, telemetry, logs and workspace editing
//! over one operator endpoint.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use openclaw_launcher::orchestrator::reconciler;
use openclaw_launcher::router::{self, AppState};
use openclaw_launcher::settings::{ContainerLimits, Settings};
use openclaw_launcher::Orchestrator;

#[derive(Parser)]
#[command(name = "openclaw-launcher")]
#[command(about = "Wallet-linked Docker orchestrator for OpenClaw instances")]
#[command(version)]
struct Cli {
    /// Address the HTTP API listens on
    #[arg(long, default_value = "0.0.0.0:8780")]
    listen: SocketAddr,

    /// Root directory for the store and per-instance state
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Overlay address the per-instance ports are published on
    #[arg(long, env = "TAILSCALE_IP", default_value = "100.118.141.107")]
    tailscale_ip: String,

    /// Bearer token protecting /api routes (empty disables auth)
    #[arg(long, env = "LAUNCHER_TOKEN", default_value = "")]
    launcher_token: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("openclaw_launcher={}", log_level).into()),
        )
        .init();

    info!("Starting OpenClaw Launcher v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings {
        listen: cli.listen,
        tailscale_ip: cli.tailscale_ip,
        launcher_token: cli.launcher_token,
        data_dir: cli.data_dir,
        limits: ContainerLimits::default(),
    };
    settings
        .ensure_directories()
        .context("failed to create data directories")?;

    info!("  Listen: {}", settings.listen);
    info!("  Data directory: {}", settings.data_dir.display());
    info!("  Published on: {}", settings.tailscale_ip);
    if settings.launcher_token.is_empty() {
        warn!("LAUNCHER_TOKEN not set, /api routes are unauthenticated");
    }

    let listen = settings.listen;
    let orchestrator = Arc::new(Orchestrator::new(settings));

    // Background health reconciliation, started exactly once.
    let shutdown = CancellationToken::new();
    reconciler::start(&orchestrator, shutdown.clone());
    info!("Started health reconciler");

    let app = router::build_router(AppState {
        orchestrator: orchestrator.clone(),
    });

    // Handle graceful shutdown
    let shutdown_trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal");
            shutdown_trigger.cancel();
        }
    });

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {}", listen))?;
    info!("Listening on {}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            // Give in-flight requests a moment before the process exits.
            tokio::time::sleep(Duration::from_millis(100)).await;
        })
        .await?;

    info!("Launcher stopped");
    Ok(())
}
