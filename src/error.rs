use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the Herald service
#[derive(Error, Debug)]
pub enum HubError {
    // Hub lifecycle
    #[error("Broadcast hub is closed")]
    Closed,

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    // Outbound notification errors
    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("Operation timed out")]
    Timeout,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Herald operations
pub type Result<T> = std::result::Result<T, HubError>;

impl HubError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            HubError::InvalidRequest(_) | HubError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 413 Payload Too Large
            HubError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 502 Bad Gateway
            HubError::Transport(_) | HubError::Notify(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            HubError::Closed => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            HubError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            HubError::Io(_) | HubError::Http(_) | HubError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

// Convert from hyper errors
impl From<hyper::Error> for HubError {
    fn from(err: hyper::Error) -> Self {
        HubError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for HubError {
    fn from(err: url::ParseError) -> Self {
        HubError::InvalidConfig(format!("invalid URL: {}", err))
    }
}
