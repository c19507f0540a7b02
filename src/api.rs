//! HTTP request adapters
//!
//! Two request shapes reach the same session operations:
//! - `/whatsapp/*`: native-shaped send, logout and webhook config
//! - `/{version}/{phone_id}/messages`: Cloud-API-shaped send and mark-as-read

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ApiJson, ErrorResponse};
use crate::session::SessionManager;
use crate::types::{CloudSendResponse, LogoutOutcome, ReadAck, SendOutcome, SessionStatus};

/// HTTP server state
#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<SessionManager>,
}

/// Loosely-typed message request; both adapters inspect it by content
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageRequest {
    #[serde(default)]
    pub messaging_product: Option<String>,
    #[serde(default)]
    pub recipient_type: Option<String>,
    #[serde(default, rename = "type")]
    pub msg_type: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub text: Option<TextField>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextField {
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookConfigRequest {
    #[serde(default)]
    pub url: Option<String>,
}

/// A validated text send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundText {
    pub to: String,
    pub body: String,
}

/// A validated Cloud API request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCommand {
    Send(OutboundText),
    MarkRead { message_id: String },
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl MessageRequest {
    fn text_body(&self) -> Option<&str> {
        self.text.as_ref().and_then(|text| non_empty(&text.body))
    }

    /// Validate a native-shaped send request
    pub fn into_native_send(self) -> Result<OutboundText, ErrorResponse> {
        let valid_shape = self.messaging_product.as_deref() == Some("whatsapp")
            && self.recipient_type.as_deref() == Some("individual")
            && self.msg_type.as_deref() == Some("text");

        match (valid_shape, non_empty(&self.to), self.text_body()) {
            (true, Some(to), Some(body)) => Ok(OutboundText {
                to: to.to_string(),
                body: body.to_string(),
            }),
            _ => Err(ErrorResponse::invalid_request(
                "Invalid Cloud API payload format",
            )),
        }
    }

    /// Classify a Cloud-API-shaped request as a send or a mark-as-read
    pub fn into_cloud_command(self) -> Result<CloudCommand, ErrorResponse> {
        if self.messaging_product.as_deref() != Some("whatsapp") {
            return Err(ErrorResponse::invalid_request(
                "messaging_product must be \"whatsapp\"",
            ));
        }

        if self.status.as_deref() == Some("read")
            && let Some(message_id) = non_empty(&self.message_id)
        {
            return Ok(CloudCommand::MarkRead {
                message_id: message_id.to_string(),
            });
        }

        if self.msg_type.as_deref() == Some("text")
            && let (Some(to), Some(body)) = (non_empty(&self.to), self.text_body())
        {
            if let Some(recipient_type) = non_empty(&self.recipient_type)
                && recipient_type != "individual"
            {
                return Err(ErrorResponse::invalid_request(
                    "recipient_type must be \"individual\"",
                ));
            }
            return Ok(CloudCommand::Send(OutboundText {
                to: to.to_string(),
                body: body.to_string(),
            }));
        }

        Err(ErrorResponse::invalid_request(
            "Invalid request. Must be either a send message request (with type, to, text.body) \
             or mark as read (with status: \"read\", message_id)",
        ))
    }
}

/// Build the HTTP router
pub fn router(session: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/whatsapp/send", post(send_message))
        .route("/whatsapp/logout", get(logout))
        .route("/whatsapp/config/webhook", get(get_webhook).post(set_webhook))
        .route("/whatsapp/status", get(status))
        .route("/{version}/{phone_id}/messages", post(cloud_messages))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(log_request))
        .with_state(ApiState { session })
}

/// Run the HTTP server
pub async fn run_server(addr: SocketAddr, session: Arc<SessionManager>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(session)).await?;

    Ok(())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Middleware to log all incoming HTTP requests
async fn log_request(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("🌐 HTTP {} {}", method, path);

    let response = next.run(req).await;

    info!("📤 Response status: {}", response.status());

    response
}

/// POST /whatsapp/send
async fn send_message(
    State(state): State<ApiState>,
    ApiJson(request): ApiJson<MessageRequest>,
) -> Result<Json<SendOutcome>, ErrorResponse> {
    let OutboundText { to, body } = request.into_native_send()?;
    let outcome = state.session.send_text(&to, &body).await?;
    Ok(Json(outcome))
}

/// GET /whatsapp/logout
async fn logout(State(state): State<ApiState>) -> Result<Json<LogoutOutcome>, ErrorResponse> {
    Ok(Json(state.session.logout().await?))
}

/// GET /whatsapp/config/webhook
async fn get_webhook(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "webhookUrl": state.session.webhook_url() }))
}

/// POST /whatsapp/config/webhook
async fn set_webhook(
    State(state): State<ApiState>,
    ApiJson(request): ApiJson<WebhookConfigRequest>,
) -> Result<Json<Value>, ErrorResponse> {
    let url = non_empty(&request.url)
        .ok_or_else(|| ErrorResponse::invalid_request("url is required"))?;
    let webhook_url = state.session.set_webhook_url(url)?;
    Ok(Json(json!({ "success": true, "webhookUrl": webhook_url })))
}

/// GET /whatsapp/status
async fn status(State(state): State<ApiState>) -> Json<SessionStatus> {
    Json(state.session.status())
}

/// Response of the Cloud-API-shaped endpoint
#[derive(serde::Serialize)]
#[serde(untagged)]
enum CloudReply {
    Sent(CloudSendResponse),
    Read(ReadAck),
}

/// POST /{version}/{phone_id}/messages
async fn cloud_messages(
    State(state): State<ApiState>,
    Path((version, phone_id)): Path<(String, String)>,
    ApiJson(request): ApiJson<MessageRequest>,
) -> Result<Json<CloudReply>, ErrorResponse> {
    debug!("Cloud API request: {}/{}/messages - {:?}", version, phone_id, request);

    match request.into_cloud_command()? {
        CloudCommand::MarkRead { message_id } => {
            Ok(Json(CloudReply::Read(state.session.mark_read(&message_id))))
        }
        CloudCommand::Send(OutboundText { to, body }) => Ok(Json(CloudReply::Sent(
            state.session.send_text_cloud(&to, &body).await?,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{ready_session, session_with};
    use crate::transport::fake::FakeTransport;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let req = match body {
            Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 100_000)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn native_body() -> Value {
        json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "type": "text",
            "to": "12345",
            "text": {"body": "hi"}
        })
    }

    #[test]
    fn test_native_validation() {
        let valid: MessageRequest = serde_json::from_value(native_body()).unwrap();
        assert_eq!(
            valid.into_native_send().unwrap(),
            OutboundText {
                to: "12345".to_string(),
                body: "hi".to_string(),
            }
        );

        for (field, value) in [
            ("messaging_product", json!("sms")),
            ("recipient_type", json!("group")),
            ("type", json!("image")),
            ("to", json!("")),
            ("text", json!({})),
        ] {
            let mut body = native_body();
            body[field] = value;
            let request: MessageRequest = serde_json::from_value(body).unwrap();
            assert!(request.into_native_send().is_err(), "{} accepted", field);
        }
    }

    #[test]
    fn test_cloud_classification() {
        let read: MessageRequest = serde_json::from_value(json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": "X"
        }))
        .unwrap();
        assert_eq!(
            read.into_cloud_command().unwrap(),
            CloudCommand::MarkRead {
                message_id: "X".to_string()
            }
        );

        let group: MessageRequest = serde_json::from_value(json!({
            "messaging_product": "whatsapp",
            "recipient_type": "group",
            "type": "text",
            "to": "999",
            "text": {"body": "hey"}
        }))
        .unwrap();
        assert!(group.into_cloud_command().is_err());

        let read_without_id: MessageRequest = serde_json::from_value(json!({
            "messaging_product": "whatsapp",
            "status": "read"
        }))
        .unwrap();
        assert!(read_without_id.into_cloud_command().is_err());
    }

    #[tokio::test]
    async fn test_native_send() {
        let transport = Arc::new(FakeTransport::new());
        let app = router(ready_session(transport.clone()).await);

        let (status, body) = call(app, "POST", "/whatsapp/send", Some(native_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["response"]["to"], "12345@c.us");
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_native_send_missing_body_is_rejected() {
        let transport = Arc::new(FakeTransport::new());
        let app = router(ready_session(transport.clone()).await);

        let mut request = native_body();
        request["text"] = json!({});
        let (status, body) = call(app, "POST", "/whatsapp/send", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request");
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_native_send_not_connected_is_server_error() {
        let app = router(session_with(Arc::new(FakeTransport::new())));

        let (status, body) = call(app, "POST", "/whatsapp/send", Some(native_body())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "WhatsApp client is not connected");
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let app = router(session_with(Arc::new(FakeTransport::new())));

        let req = Request::builder()
            .method("POST")
            .uri("/whatsapp/send")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cloud_mark_read() {
        let transport = Arc::new(FakeTransport::new());
        let app = router(session_with(transport.clone()));

        let (status, body) = call(
            app,
            "POST",
            "/v17.0/1234567890/messages",
            Some(json!({"messaging_product": "whatsapp", "status": "read", "message_id": "X"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_cloud_send() {
        let transport = Arc::new(FakeTransport::new());
        let app = router(ready_session(transport.clone()).await);

        let (status, body) = call(
            app,
            "POST",
            "/v17.0/1234567890/messages",
            Some(json!({
                "messaging_product": "whatsapp",
                "type": "text",
                "to": "999",
                "text": {"body": "hey"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "messaging_product": "whatsapp",
                "contacts": [{"input": "999", "wa_id": "999"}],
                "messages": [{"id": "wamid.MSG1"}]
            })
        );
    }

    #[tokio::test]
    async fn test_cloud_rejects_other_products() {
        let app = router(session_with(Arc::new(FakeTransport::new())));

        let (status, body) = call(
            app,
            "POST",
            "/v17.0/1234567890/messages",
            Some(json!({"messaging_product": "sms", "status": "read", "message_id": "X"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "messaging_product must be \"whatsapp\"");
    }

    #[tokio::test]
    async fn test_webhook_config() {
        let session = session_with(Arc::new(FakeTransport::new()));

        let (status, body) = call(router(session.clone()), "GET", "/whatsapp/config/webhook", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"webhookUrl": null}));

        let (status, body) = call(
            router(session.clone()),
            "POST",
            "/whatsapp/config/webhook",
            Some(json!({"url": "https://example.com/hook"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"success": true, "webhookUrl": "https://example.com/hook"})
        );

        let (status, _) = call(
            router(session.clone()),
            "POST",
            "/whatsapp/config/webhook",
            Some(json!({"url": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = call(router(session), "GET", "/whatsapp/config/webhook", None).await;
        assert_eq!(body["webhookUrl"], "https://example.com/hook");
    }

    #[tokio::test]
    async fn test_logout_routes() {
        let transport = Arc::new(FakeTransport::new());
        let session = ready_session(transport.clone()).await;

        let (status, body) = call(router(session.clone()), "GET", "/whatsapp/logout", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) = call(router(session), "GET", "/whatsapp/logout", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_status_and_health() {
        let session = ready_session(Arc::new(FakeTransport::new())).await;

        let (status, body) = call(router(session.clone()), "GET", "/whatsapp/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "ready");
        assert_eq!(body["selfId"], "15550001111");

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = router(session).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
