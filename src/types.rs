//! Connection state, client events, bridge frames and the vendor wire shapes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle of the single underlying client connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// `initialize()` has not been called yet
    Uninitialized,
    /// Waiting for the client to finish its handshake (pairing, loading)
    Connecting,
    /// Outbound operations are allowed
    Ready,
    /// The client dropped or was logged out
    Disconnected,
    /// The client rejected the stored session
    AuthFailed,
}

impl ConnectionState {
    pub fn is_ready(self) -> bool {
        self == ConnectionState::Ready
    }
}

/// Inbound chat message as reported by the underlying client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender identifier, usually carrying a routing suffix (`12345@c.us`)
    pub from: String,
    /// Raw message id
    pub id: String,
    /// Unix timestamp in seconds
    pub timestamp: i64,
    /// Text body
    #[serde(default)]
    pub body: String,
    /// Sender display name, if the client knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_name: Option<String>,
}

/// Notifications emitted by the underlying client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// First-time pairing code that must be scanned by the operator
    Qr { code: String },
    /// Loading progress while the client syncs
    Loading { percent: u8, message: Option<String> },
    /// Stored credentials were accepted
    Authenticated,
    /// Handshake completed; `self_id` is the connected account's identifier
    Ready { self_id: Option<String> },
    /// Stored credentials were rejected
    AuthFailure { message: String },
    /// Connection lost or logged out
    Disconnected { reason: String },
    /// Inbound chat message
    Message(InboundMessage),
}

/// Message accepted by the underlying client for delivery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SentMessage {
    /// Message id assigned by the underlying client
    pub id: String,
    /// Chat id the message was sent to
    #[serde(default)]
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

// =============================================================================
// Bridge Protocol (between proxy and automation sidecar)
// =============================================================================

/// WebSocket frames exchanged with the automation sidecar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeFrame {
    /// Authentication request (sidecar -> proxy)
    Auth { api_key: String },
    /// Authentication response (proxy -> sidecar)
    AuthResult { success: bool, message: String },
    /// Ask the sidecar to start its client (proxy -> sidecar)
    Initialize,
    Qr {
        code: String,
    },
    Loading {
        #[serde(default)]
        percent: u8,
        #[serde(default)]
        message: Option<String>,
    },
    Authenticated,
    Ready {
        #[serde(default)]
        self_id: Option<String>,
    },
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    /// Inbound chat message (sidecar -> proxy)
    Message(InboundMessage),
    /// Send a text message (proxy -> sidecar)
    SendMessage {
        request_id: Uuid,
        to: String,
        body: String,
    },
    /// Log the client out (proxy -> sidecar)
    Logout { request_id: Uuid },
    /// Outcome of a command (sidecar -> proxy)
    Result {
        request_id: Uuid,
        ok: bool,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Heartbeat
    Ping,
    /// Heartbeat response
    Pong,
}

impl BridgeFrame {
    /// Lifecycle and message frames map onto client events; everything else is protocol
    pub fn into_event(self) -> Option<ClientEvent> {
        match self {
            BridgeFrame::Qr { code } => Some(ClientEvent::Qr { code }),
            BridgeFrame::Loading { percent, message } => {
                Some(ClientEvent::Loading { percent, message })
            }
            BridgeFrame::Authenticated => Some(ClientEvent::Authenticated),
            BridgeFrame::Ready { self_id } => Some(ClientEvent::Ready { self_id }),
            BridgeFrame::AuthFailure { message } => Some(ClientEvent::AuthFailure { message }),
            BridgeFrame::Disconnected { reason } => Some(ClientEvent::Disconnected { reason }),
            BridgeFrame::Message(message) => Some(ClientEvent::Message(message)),
            _ => None,
        }
    }
}

// =============================================================================
// Vendor Cloud API Shapes
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextBody {
    pub body: String,
}

/// Webhook envelope delivered for every inbound message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookPayload {
    pub object: String,
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookEntry {
    pub id: String,
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookChange {
    pub value: WebhookValue,
    pub field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookValue {
    pub messaging_product: String,
    pub metadata: WebhookMetadata,
    pub contacts: Vec<WebhookContact>,
    pub messages: Vec<WebhookMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookMetadata {
    pub display_phone_number: String,
    pub phone_number_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookContact {
    pub profile: ContactProfile,
    pub wa_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactProfile {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookMessage {
    pub from: String,
    pub id: String,
    pub timestamp: String,
    pub text: TextBody,
    #[serde(rename = "type")]
    pub msg_type: String,
}

/// Response body of a Cloud-API-shaped send
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudSendResponse {
    pub messaging_product: String,
    pub contacts: Vec<CloudContact>,
    pub messages: Vec<CloudMessageRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudContact {
    pub input: String,
    pub wa_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudMessageRef {
    pub id: String,
}

// =============================================================================
// Session Operation Results
// =============================================================================

/// Result of a native-shaped send
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub response: SentMessage,
}

/// Result of a mark-as-read request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadAck {
    pub success: bool,
}

/// Result of a logout request; `success: false` when the client was not connected
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogoutOutcome {
    pub success: bool,
    pub message: String,
}

/// Snapshot served by the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub self_id: Option<String>,
    pub webhook_url: Option<String>,
    pub pairing_code: Option<String>,
}
