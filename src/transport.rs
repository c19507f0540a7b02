//! The underlying messaging client, seen from the session manager

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::types::{ClientEvent, SentMessage};

/// Capability of the underlying messaging client.
///
/// Implementations push lifecycle and message notifications into the sender
/// handed to [`Transport::connect`]; the session manager is the only reader.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting. Returns once the attempt has been started, not
    /// when the handshake completes (that arrives as [`ClientEvent::Ready`]).
    async fn connect(&self, events: mpsc::Sender<ClientEvent>) -> Result<(), SessionError>;

    /// Send a text message to a transport-ready chat id
    async fn send_text(&self, chat_id: &str, body: &str) -> Result<SentMessage, SessionError>;

    /// Log the client out and drop its stored session
    async fn logout(&self) -> Result<(), SessionError>;
}
