//! linemq: a message queue server with a line-oriented text protocol.
//!
//! Clients connect over TCP and exchange one request/response per line;
//! fields are `Key=Value` pairs joined by `~SEP~`. The network core decodes
//! requests, hands them to the dispatch boundary, and writes encoded
//! responses back, with bounded connection concurrency and graceful drain
//! on shutdown.

mod config;
mod dispatch;
mod protocol;
mod server;
mod session;

use std::sync::Arc;
use std::time::Duration;

use config::Config;
use dispatch::StubDispatch;
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        max_connections = config.max_connections,
        drain_timeout_secs = config.drain_timeout_secs,
        "Starting linemq server"
    );

    let drain_timeout = Duration::from_secs(config.drain_timeout_secs);
    let server = Server::new(config, Arc::new(StubDispatch));
    server.start().await?;

    // Serve until interrupted, then drain.
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    server.stop(drain_timeout).await;
    Ok(())
}
