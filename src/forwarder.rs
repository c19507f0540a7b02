//! Inbound message forwarding
//!
//! Every inbound chat message is rewritten into the Cloud API webhook envelope
//! and POSTed to the configured webhook target. Delivery is at-most-once:
//! failures are logged and dropped.

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::phone;
use crate::types::{
    ContactProfile, InboundMessage, TextBody, WebhookChange, WebhookContact, WebhookEntry,
    WebhookMessage, WebhookMetadata, WebhookPayload, WebhookValue,
};

/// Account id used in the envelope until the client reports its own number
pub const PLACEHOLDER_PHONE_ID: &str = "1234567890";

/// Profile name used when the sender has no display name
const UNKNOWN_SENDER: &str = "Unknown";

/// Builds webhook payloads and delivers them on detached tasks
#[derive(Clone)]
pub struct EventForwarder {
    http_client: Client,
    debug_mode: bool,
}

impl EventForwarder {
    pub fn new(timeout: Duration, debug_mode: bool) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;

        Ok(Self {
            http_client,
            debug_mode,
        })
    }

    /// Build the Cloud API webhook envelope for one inbound message
    pub fn build_payload(message: &InboundMessage, self_id: Option<&str>) -> WebhookPayload {
        let account_id = self_id.unwrap_or(PLACEHOLDER_PHONE_ID).to_string();
        let sender = phone::bare(&message.from);

        let contact = WebhookContact {
            profile: ContactProfile {
                name: message
                    .notify_name
                    .clone()
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
            },
            wa_id: sender.clone(),
        };

        let webhook_message = WebhookMessage {
            from: sender,
            id: message.id.clone(),
            timestamp: message.timestamp.to_string(),
            text: TextBody {
                body: message.body.clone(),
            },
            msg_type: "text".to_string(),
        };

        WebhookPayload {
            object: "whatsapp_business_account".to_string(),
            entry: vec![WebhookEntry {
                id: account_id.clone(),
                changes: vec![WebhookChange {
                    value: WebhookValue {
                        messaging_product: "whatsapp".to_string(),
                        metadata: WebhookMetadata {
                            display_phone_number: account_id.clone(),
                            phone_number_id: account_id,
                        },
                        contacts: vec![contact],
                        messages: vec![webhook_message],
                    },
                    field: "messages".to_string(),
                }],
            }],
        }
    }

    /// Forward one message. Returns the delivery task, or `None` when no
    /// webhook target is configured and the message was dropped.
    pub fn forward(
        &self,
        message: &InboundMessage,
        target: Option<String>,
        self_id: Option<&str>,
    ) -> Option<JoinHandle<()>> {
        let Some(url) = target else {
            warn!("WEBHOOK_URL not set, message {} not forwarded", message.id);
            return None;
        };

        let payload = Self::build_payload(message, self_id);
        if self.debug_mode {
            debug!(
                "Webhook payload: {}",
                serde_json::to_string(&payload).unwrap_or_default()
            );
        }

        let http_client = self.http_client.clone();
        let message_id = message.id.clone();
        Some(tokio::spawn(async move {
            match deliver(&http_client, &url, &payload).await {
                Ok(()) => info!("Message {} forwarded to webhook: {}", message_id, url),
                Err(e) => error!(
                    "Failed to forward message {} to webhook {}: {:#}",
                    message_id, url, e
                ),
            }
        }))
    }
}

async fn deliver(http_client: &Client, url: &str, payload: &WebhookPayload) -> Result<()> {
    http_client
        .post(url)
        .json(payload)
        .send()
        .await
        .context("Failed to send webhook request")?
        .error_for_status()
        .context("Webhook receiver rejected the payload")?;
    Ok(())
}
