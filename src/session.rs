//! Session manager - owns the single client connection and its state
//!
//! All outbound operations are gated on [`ConnectionState::Ready`]. The state
//! check and the transport call are not atomic: a disconnect landing while a
//! send is in flight surfaces as whatever the transport reports.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::forwarder::EventForwarder;
use crate::phone;
use crate::transport::Transport;
use crate::types::{
    ClientEvent, CloudContact, CloudMessageRef, CloudSendResponse, ConnectionState,
    LogoutOutcome, ReadAck, SendOutcome, SessionStatus,
};

/// Prefix of message ids returned in Cloud-API-shaped responses
pub const CLOUD_MESSAGE_ID_PREFIX: &str = "wamid.";

/// Capacity of the client event channel
const EVENT_BUFFER: usize = 256;

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    forwarder: EventForwarder,
    state: RwLock<ConnectionState>,
    webhook_url: RwLock<Option<String>>,
    /// Connected account number, known once the client is ready
    self_id: RwLock<Option<String>>,
    /// Latest pairing code, cleared when the client becomes ready
    pairing_code: RwLock<Option<String>>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        forwarder: EventForwarder,
        webhook_url: Option<String>,
    ) -> Self {
        Self {
            transport,
            forwarder,
            state: RwLock::new(ConnectionState::Uninitialized),
            webhook_url: RwLock::new(webhook_url.filter(|url| !url.trim().is_empty())),
            self_id: RwLock::new(None),
            pairing_code: RwLock::new(None),
        }
    }

    /// Start the client connection and the event loop that consumes its
    /// notifications. May only be called once.
    pub async fn initialize(self: &Arc<Self>) -> Result<JoinHandle<()>, SessionError> {
        {
            let mut state = self.state.write();
            if *state != ConnectionState::Uninitialized {
                return Err(SessionError::AlreadyInitialized);
            }
            *state = ConnectionState::Connecting;
        }

        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let session = Arc::clone(self);
        let event_loop = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                session.handle_event(event);
            }
            debug!("Client event stream closed");
        });

        info!("Connecting WhatsApp client...");
        if let Err(e) = self.transport.connect(tx).await {
            error!("Failed to start WhatsApp client: {}", e);
            *self.state.write() = ConnectionState::Disconnected;
            event_loop.abort();
            return Err(e);
        }

        Ok(event_loop)
    }

    /// Apply one client notification
    pub fn handle_event(&self, event: ClientEvent) {
        if *self.state.read() == ConnectionState::Uninitialized {
            warn!("Ignoring client event before initialize: {:?}", event);
            return;
        }

        match event {
            ClientEvent::Qr { code } => {
                info!("QR code received, scan it with your phone:");
                info!("{}", code);
                *self.pairing_code.write() = Some(code);
            }
            ClientEvent::Loading { percent, message } => {
                info!(
                    "Loading WhatsApp client: {}% {}",
                    percent,
                    message.unwrap_or_default()
                );
            }
            ClientEvent::Authenticated => {
                info!("WhatsApp client authenticated");
            }
            ClientEvent::Ready { self_id } => {
                {
                    let mut state = self.state.write();
                    if !matches!(
                        *state,
                        ConnectionState::Connecting | ConnectionState::Disconnected
                    ) {
                        warn!("Ignoring ready event in state {:?}", *state);
                        return;
                    }
                    *state = ConnectionState::Ready;
                }
                *self.self_id.write() = self_id.as_deref().map(phone::bare);
                *self.pairing_code.write() = None;

                info!("WhatsApp client is ready!");
                info!(
                    "Current webhook URL: {}",
                    self.webhook_url().as_deref().unwrap_or("Not set")
                );
            }
            ClientEvent::AuthFailure { message } => {
                let mut state = self.state.write();
                if matches!(*state, ConnectionState::Connecting | ConnectionState::Ready) {
                    *state = ConnectionState::AuthFailed;
                }
                error!("WhatsApp authentication failed: {}", message);
            }
            ClientEvent::Disconnected { reason } => {
                let mut state = self.state.write();
                if !matches!(*state, ConnectionState::Connecting | ConnectionState::Ready) {
                    warn!("Ignoring disconnect in state {:?}: {}", *state, reason);
                    return;
                }
                *state = ConnectionState::Disconnected;
                warn!("WhatsApp client was disconnected: {}", reason);
            }
            ClientEvent::Message(message) => {
                info!("Received message from {}: {}", message.from, message.body);
                let self_id = self.self_id.read().clone();
                // Detached; delivery never blocks the next event
                let _ = self
                    .forwarder
                    .forward(&message, self.webhook_url(), self_id.as_deref());
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            self_id: self.self_id.read().clone(),
            webhook_url: self.webhook_url(),
            pairing_code: self.pairing_code.read().clone(),
        }
    }

    pub fn webhook_url(&self) -> Option<String> {
        self.webhook_url.read().clone()
    }

    /// Replace the webhook target unconditionally; the value is stored as given
    pub fn set_webhook_url(&self, url: &str) -> Result<String, SessionError> {
        if url.trim().is_empty() {
            return Err(SessionError::InvalidWebhookUrl);
        }

        *self.webhook_url.write() = Some(url.to_string());
        info!("Webhook URL updated to: {}", url);
        Ok(url.to_string())
    }

    fn ensure_ready(&self) -> Result<(), SessionError> {
        if self.state().is_ready() {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    /// Send a text message and return the client's response
    pub async fn send_text(&self, to: &str, body: &str) -> Result<SendOutcome, SessionError> {
        self.ensure_ready()?;
        let recipient = phone::normalize(to);

        match self.transport.send_text(&recipient.chat_id, body).await {
            Ok(response) => Ok(SendOutcome {
                success: true,
                response,
            }),
            Err(e) => {
                error!("Failed to send message to {}: {}", recipient.chat_id, e);
                Err(e)
            }
        }
    }

    /// Send a text message and answer in the Cloud API response shape
    pub async fn send_text_cloud(
        &self,
        to: &str,
        body: &str,
    ) -> Result<CloudSendResponse, SessionError> {
        self.ensure_ready()?;
        let recipient = phone::normalize(to);

        let sent = match self.transport.send_text(&recipient.chat_id, body).await {
            Ok(sent) => sent,
            Err(e) => {
                error!("Failed to send message to {}: {}", recipient.chat_id, e);
                return Err(e);
            }
        };

        Ok(CloudSendResponse {
            messaging_product: "whatsapp".to_string(),
            contacts: vec![CloudContact {
                input: recipient.wa_id.clone(),
                wa_id: recipient.wa_id,
            }],
            messages: vec![CloudMessageRef {
                id: format!("{}{}", CLOUD_MESSAGE_ID_PREFIX, sent.id),
            }],
        })
    }

    /// Acknowledge a read request.
    ///
    /// The underlying client has no primitive for marking an arbitrary message
    /// as read, so no read receipt is transmitted; this always succeeds.
    pub fn mark_read(&self, message_id: &str) -> ReadAck {
        debug!("Mark-as-read for {} acknowledged without a receipt", message_id);
        ReadAck { success: true }
    }

    /// Log the client out. Not being connected is a soft failure, not an error.
    pub async fn logout(&self) -> Result<LogoutOutcome, SessionError> {
        if self.ensure_ready().is_err() {
            warn!("Logout requested while client is {:?}", self.state());
            return Ok(LogoutOutcome {
                success: false,
                message: "Client is not connected".to_string(),
            });
        }

        if let Err(e) = self.transport.logout().await {
            error!("Failed to logout: {}", e);
            return Err(e);
        }

        *self.state.write() = ConnectionState::Disconnected;
        info!("Client logged out");
        Ok(LogoutOutcome {
            success: true,
            message: "Logged out successfully".to_string(),
        })
    }
}
