//! Error types for the session core and their HTTP mapping

use axum::{
    extract::{FromRequest, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Errors raised by the session manager and the transport beneath it
#[derive(Debug, Error)]
pub enum SessionError {
    /// Outbound operation attempted while the client is not `Ready`
    #[error("WhatsApp client is not connected")]
    NotConnected,

    /// Failure reported by the underlying client, passed through unchanged
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Webhook URL must not be empty")]
    InvalidWebhookUrl,

    #[error("Session already initialized")]
    AlreadyInitialized,
}

/// Error response structure for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, error_type: &str) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                r#type: error_type.to_string(),
            },
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(message, "invalid_request")
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(message, "internal_error")
    }

    pub fn status(&self) -> StatusCode {
        match self.error.r#type.as_str() {
            "invalid_request" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<SessionError> for ErrorResponse {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidWebhookUrl => ErrorResponse::invalid_request(err.to_string()),
            other => ErrorResponse::internal_error(other.to_string()),
        }
    }
}

/// JSON extractor that answers malformed bodies with our [`ErrorResponse`]
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ErrorResponse))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for ErrorResponse {
    fn from(rejection: JsonRejection) -> Self {
        let message = rejection.body_text();
        error!("JSON deserialization error: {}", message);
        ErrorResponse::invalid_request(message)
    }
}
