//! Error types and response handling for the proxy server.
//!
//! Provides structured error classification, HTTP status code mapping,
//! and JSON error response generation.

use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use crate::capture::FormatError;
use crate::config::ConfigError;
use crate::reconstruct::FetchError;
use crate::transport::TransportError;

/// Errors that can occur during proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Forwarding to the upstream failed before a response arrived
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] TransportError),

    /// No capture with this id in the history
    #[error("Capture '{id}' not found")]
    CaptureNotFound { id: Uuid },

    /// Capture is complete or carries no replay context
    #[error("Capture '{id}' has no further rows to fetch")]
    NotFetchable { id: Uuid },

    /// Another fetch-all for this capture has not finished yet
    #[error("A fetch is already running for capture '{id}'")]
    FetchInProgress { id: Uuid },

    /// Path under the control prefix that no route handles
    #[error("No control route for '{0}'")]
    UnknownControlRoute(String),

    /// A reconstruction run failed
    #[error("Fetch failed ({}): {}", .0.category(), .0)]
    Fetch(#[from] FetchError),

    /// Rendering a capture as delimited text failed
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Invalid request format or parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Listener could not be bound or served
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// HTTP error from response building
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<axum::http::Error> for ProxyError {
    fn from(err: axum::http::Error) -> Self {
        ProxyError::Http(err.to_string())
    }
}

impl ProxyError {
    /// Map error variant to appropriate HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Upstream(TransportError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Upstream(TransportError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::CaptureNotFound { .. } => StatusCode::NOT_FOUND,
            ProxyError::NotFetchable { .. } => StatusCode::CONFLICT,
            ProxyError::FetchInProgress { .. } => StatusCode::CONFLICT,
            ProxyError::UnknownControlRoute(_) => StatusCode::NOT_FOUND,
            ProxyError::Fetch(err) => match err {
                FetchError::Auth { .. } => StatusCode::UNAUTHORIZED,
                FetchError::Transport(TransportError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
                FetchError::Protocol(_) => StatusCode::CONFLICT,
                FetchError::Transport(_) | FetchError::Server { .. } | FetchError::Parse(_) => {
                    StatusCode::BAD_GATEWAY
                }
            },
            ProxyError::Format(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error type string for JSON responses
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::Config(_) => "config_error",
            ProxyError::Upstream(TransportError::Timeout { .. }) => "request_timeout",
            ProxyError::Upstream(_) => "connection_error",
            ProxyError::CaptureNotFound { .. } => "capture_not_found",
            ProxyError::NotFetchable { .. } => "not_fetchable",
            ProxyError::FetchInProgress { .. } => "fetch_in_progress",
            ProxyError::UnknownControlRoute(_) => "not_found",
            ProxyError::Fetch(err) => match err {
                FetchError::Transport(_) => "fetch_transport_error",
                FetchError::Auth { .. } => "fetch_auth_error",
                FetchError::Server { .. } => "fetch_server_error",
                FetchError::Parse(_) => "fetch_parse_error",
                FetchError::Protocol(_) => "fetch_protocol_error",
            },
            ProxyError::Format(_) => "format_error",
            ProxyError::InvalidRequest(_) => "invalid_request",
            ProxyError::Io(_) => "io_error",
            ProxyError::Internal(_) => "internal_error",
            ProxyError::Http(_) => "http_error",
        }
    }
}

/// Builder for standardized error responses
pub struct ErrorResponse;

impl ErrorResponse {
    /// Create a JSON error response from a ProxyError
    pub fn from_error(err: &ProxyError, request_id: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": err.error_type(),
                "message": err.to_string(),
                "request_id": request_id
            }
        });

        (
            err.status_code(),
            [(CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        tracing::debug!(
            request_id = %request_id,
            error_type = self.error_type(),
            error = %self,
            "Request failed"
        );
        ErrorResponse::from_error(&self, &request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_not_found_status_code() {
        let err = ProxyError::CaptureNotFound { id: Uuid::nil() };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_type(), "capture_not_found");
    }

    #[test]
    fn test_upstream_timeout_status_code() {
        let err = ProxyError::Upstream(TransportError::Timeout {
            url: "http://upstream".to_string(),
            duration: 30,
        });
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.error_type(), "request_timeout");
    }

    #[test]
    fn test_fetch_errors_keep_category() {
        let err = ProxyError::from(FetchError::Auth { status: 401 });
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_type(), "fetch_auth_error");
        assert_eq!(
            err.to_string(),
            "Fetch failed (auth): Authentication rejected with status 401"
        );

        let err = ProxyError::from(FetchError::Server {
            status: 500,
            message: "boom".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_control_conflicts_and_unknown_routes() {
        let err = ProxyError::FetchInProgress { id: Uuid::nil() };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_type(), "fetch_in_progress");

        let err = ProxyError::UnknownControlRoute("/_querytap/nope".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_type(), "not_found");
    }

    #[test]
    fn test_error_response_format() {
        let err = ProxyError::NotFetchable { id: Uuid::nil() };
        let response = ErrorResponse::from_error(&err, "test-id-123");

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );
    }
}
