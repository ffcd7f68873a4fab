//! kcpraw
//!
//! Raw TCP front for a tunnel server.
//!
//! This service:
//! - Accepts TCP connections on one listen address
//! - Sniffs the first two bytes for a tunnel frame header
//! - Dials the tunnel endpoint or the direct target accordingly
//! - Replays the sniffed bytes and relays both directions until close

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kcpraw_relay::{Config, Listener};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to KCPRAW_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting kcpraw");
    info!(
        listen = %config.listen,
        tunnel = %config.tunnel,
        target = %config.target,
        sniff = config.sniff,
        protocol_version = ?config.protocol_version,
        max_connections = config.max_connections,
        "Configuration loaded"
    );

    let listener = match Listener::bind(config.listener_config(), config.dispatcher()).await {
        Ok(listener) => Arc::new(listener),
        Err(e) => {
            error!(bind_addr = %config.listen, error = %e, "Failed to bind listener");
            return Err(e).with_context(|| format!("failed to listen on {}", config.listen));
        }
    };

    listener.run().await.context("listener stopped")
}
