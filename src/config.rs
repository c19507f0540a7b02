//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Proxy server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    // =========================================================================
    // HTTP Surface
    // =========================================================================
    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public base URL, used for startup hints
    pub base_url: String,

    /// Initial webhook target for inbound messages
    pub webhook_url: Option<String>,

    /// Timeout for webhook POSTs in seconds
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,

    // =========================================================================
    // Automation Sidecar Bridge
    // =========================================================================
    /// WebSocket bind address for the sidecar
    #[serde(default = "default_bridge_addr")]
    pub bridge_addr: String,

    /// API key the sidecar must present (unset = no auth)
    pub bridge_api_key: Option<String>,

    /// How long a bridged command waits for the sidecar, in seconds
    #[serde(default = "default_command_timeout")]
    pub bridge_command_timeout_secs: u64,

    /// Log raw bridge frames and webhook payloads
    #[serde(default)]
    pub debug_mode: bool,
}

fn default_port() -> u16 {
    3005
}

fn default_bridge_addr() -> String {
    "0.0.0.0:3006".to_string()
}

fn default_command_timeout() -> u64 {
    30
}

fn default_webhook_timeout() -> u64 {
    10
}

impl ProxyConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match lookup("PORT") {
            Some(port) => port
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a port number, got {:?}", port))?,
            None => default_port(),
        };

        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            port,
            base_url: non_empty("BASE_URL")
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            webhook_url: non_empty("WEBHOOK_URL"),
            webhook_timeout_secs: lookup("WEBHOOK_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_webhook_timeout),

            bridge_addr: non_empty("BRIDGE_ADDR").unwrap_or_else(default_bridge_addr),
            bridge_api_key: non_empty("BRIDGE_API_KEY"),
            bridge_command_timeout_secs: lookup("BRIDGE_COMMAND_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_command_timeout),
            debug_mode: lookup("DEBUG_MODE").is_some(),
        })
    }

    /// HTTP bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn logout_url(&self) -> String {
        format!("{}/whatsapp/logout", self.base_url.trim_end_matches('/'))
    }
}
