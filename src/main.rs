//! WA Cloud Proxy - Main Entry Point
//!
//! Exposes a WhatsApp Web session through an API shaped like the official
//! Cloud API:
//! 1. Accepts send / mark-as-read requests over HTTP
//! 2. Relays them to the browser-automation sidecar over WebSocket
//! 3. Forwards inbound messages to a webhook as Cloud API payloads
//!
//! # Architecture
//!
//! ```text
//! API client ──HTTP──▶ Proxy (this) ──WebSocket──▶ Sidecar (WhatsApp Web)
//!                        │
//!                        ├── HTTP Server (port 3005)
//!                        ├── Bridge Server (port 3006)
//!                        └── Webhook Forwarder ──HTTP──▶ WEBHOOK_URL
//! ```

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wa_cloud_proxy::bridge::{self, BridgeTransport};
use wa_cloud_proxy::{EventForwarder, ProxyConfig, SessionManager, api};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,wa_cloud_proxy=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 WA Cloud Proxy starting...");

    // Load configuration
    let config = ProxyConfig::from_env()?;
    info!("📋 Configuration loaded");

    // Create shared state
    let bridge = Arc::new(BridgeTransport::new(
        config.bridge_api_key.clone(),
        Duration::from_secs(config.bridge_command_timeout_secs),
        config.debug_mode,
    ));
    let forwarder = EventForwarder::new(
        Duration::from_secs(config.webhook_timeout_secs),
        config.debug_mode,
    )?;
    let session = Arc::new(SessionManager::new(
        bridge.clone(),
        forwarder,
        config.webhook_url.clone(),
    ));

    // Spawn bridge server
    let bridge_addr: SocketAddr = config.bridge_addr.parse()?;
    let bridge_server = spawn_bridge_server(bridge_addr, bridge);

    let event_loop = session.initialize().await?;

    // Spawn HTTP server
    let http_server = spawn_http_server(config.http_addr(), session.clone());

    info!("🌐 Server running on {}", config.base_url);
    info!("🚪 Logout URL: {}", config.logout_url());

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => info!("📢 Shutdown signal received"),
        Err(err) => tracing::error!("Unable to listen for shutdown signal: {}", err),
    }

    // Graceful shutdown
    info!("🛑 Shutting down servers...");
    http_server.abort();
    bridge_server.abort();
    event_loop.abort();

    info!("✅ WA Cloud Proxy stopped");
    Ok(())
}

/// Spawn the HTTP API server
fn spawn_http_server(
    addr: SocketAddr,
    session: Arc<SessionManager>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = api::run_server(addr, session).await {
            tracing::error!("HTTP server error: {}", e);
        }
    })
}

/// Spawn the sidecar bridge server
fn spawn_bridge_server(
    addr: SocketAddr,
    bridge: Arc<BridgeTransport>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = bridge::run_server(addr, bridge).await {
            tracing::error!("Bridge server error: {}", e);
        }
    })
}
