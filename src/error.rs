//! Error types for degpt-gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No multimodal model available: {0}")]
    ModelUnavailable(String),

    #[error("Invalid or missing token")]
    Unauthorized,

    #[error("Failed to reach upstream: {0}")]
    UpstreamTransport(String),

    #[error("Upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Unexpected upstream payload: {0}")]
    UpstreamPayload(String),

    #[error("Model discovery failed: {0}")]
    Discovery(String),

    #[error("Upstream stream failed: {0}")]
    Stream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status the error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::ModelUnavailable(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::UpstreamTransport(_)
            | Error::UpstreamStatus { .. }
            | Error::UpstreamPayload(_)
            | Error::Stream(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::Discovery(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short machine-readable category, used in error bodies and health records.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::Validation(_) => "invalid_request_error",
            Error::ModelUnavailable(_) => "model_unavailable",
            Error::Unauthorized => "authentication_error",
            Error::UpstreamTransport(_) => "upstream_transport_error",
            Error::UpstreamStatus { .. } => "upstream_status_error",
            Error::UpstreamPayload(_) => "upstream_payload_error",
            Error::Discovery(_) => "discovery_error",
            Error::Stream(_) => "stream_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Classify a reqwest failure raised while talking to the upstream.
    ///
    /// Connection and timeout failures are transport errors; a body that
    /// fails to decode is a payload error.
    pub fn from_upstream(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::UpstreamPayload(e.to_string())
        } else if let Some(status) = e.status() {
            Error::UpstreamStatus {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            Error::UpstreamTransport(e.to_string())
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        // OpenAI-compatible error format
        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
                "code": status.as_u16()
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
