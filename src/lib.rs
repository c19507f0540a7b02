//! WA Cloud Proxy Library
//!
//! Presents a WhatsApp Web session (driven by an out-of-process browser
//! automation sidecar) through an HTTP API shaped like the WhatsApp Cloud API.
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
//!
//! # Usage
//!
//! ## Running the proxy
//!
//! ```bash
//! export PORT=3005
//! export WEBHOOK_URL=https://example.com/whatsapp/webhook  # optional
//! export BRIDGE_API_KEY=your_api_key                        # optional
//!
//! wa-cloud-proxy
//! ```
//!
//! ## Connecting the sidecar
//!
//! The sidecar connects to `ws://<host>:3006/bridge`:
//!
//! ```json
//! // 1. Authenticate
//! {"type": "auth", "api_key": "your_api_key"}
//!
//! // 2. Report lifecycle and messages
//! {"type": "qr", "code": "2@..."}
//! {"type": "ready", "self_id": "15550001111@c.us"}
//! {"type": "message", "from": "12345@c.us", "id": "ABC", "timestamp": 1700000000, "body": "hi"}
//!
//! // 3. Answer commands
//! {"type": "result", "request_id": "uuid", "ok": true, "data": {"id": "3EB0...", "to": "12345@c.us"}}
//! ```
//!
//! ## Sending
//!
//! ```bash
//! curl -X POST localhost:3005/v17.0/1234567890/messages \
//!   -H 'content-type: application/json' \
//!   -d '{"messaging_product":"whatsapp","type":"text","to":"12345","text":{"body":"hi"}}'
//! ```
//!
//! Mark-as-read requests are acknowledged but no read receipt is sent; the
//! WhatsApp Web client cannot mark an arbitrary message as read.

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod phone;
pub mod session;
pub mod transport;
pub mod types;

pub use bridge::BridgeTransport;
pub use config::ProxyConfig;
pub use error::{ErrorResponse, SessionError};
pub use forwarder::EventForwarder;
pub use session::SessionManager;
pub use transport::Transport;
pub use types::*;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::ProxyConfig;
    pub use crate::error::SessionError;
    pub use crate::session::SessionManager;
    pub use crate::transport::Transport;
    pub use crate::types::*;
}
