//! # duet server
//!
//! Runs the signaling relay:
//! - `GET /call`: WebSocket signaling between identified users
//! - `GET /api/turn-config`: relay credentials for clients
//! - `GET /health`

use clap::Parser;
use duet_relay::{RelayState, build_router};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "duet", version, about = "Signaling relay for duet voice calls")]
struct Cli {
    /// Address to bind (overrides server.host)
    #[arg(long, env = "DUET_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides server.port)
    #[arg(long, short, env = "DUET_PORT")]
    port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = duet_common::config::init()?;

    // Initialize tracing (structured logging)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "duet=debug,tower_http=debug".into());
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }

    tracing::info!("Starting duet relay v{}", env!("CARGO_PKG_VERSION"));

    let host = cli.host.unwrap_or_else(|| config.server.host.clone());
    let port = cli.port.unwrap_or(config.server.port);
    let addr = SocketAddr::new(host.parse()?, port);

    let router = build_router(RelayState::from_config(config));

    tracing::info!("Signaling relay listening on ws://{addr}/call");
    tracing::info!("Credential endpoint at http://{addr}/api/turn-config");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
