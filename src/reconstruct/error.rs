//! Error types for reconstruction runs.

use reqwest::StatusCode;
use thiserror::Error;

use crate::transport::{HttpResponse, TransportError};

/// Longest slice of an error body kept in a [`FetchError::Server`] message.
const MAX_ERROR_BODY: usize = 512;

/// Why a reconstruction run stopped without a result.
///
/// Categories let callers tell "log in again" from "server trouble" from
/// "the protocol changed under us".
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level failure
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// 401 or 403 from the server
    #[error("Authentication rejected with status {status}")]
    Auth { status: u16 },

    /// Any other non-success status, or a failed action
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    /// Body is not JSON or not the expected page shape
    #[error("Unexpected response body: {0}")]
    Parse(String),

    /// Replay context missing or incomplete
    #[error("Replay context unusable: {0}")]
    Protocol(String),
}

impl FetchError {
    /// Stable category string for logs and JSON responses
    pub fn category(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::Auth { .. } => "auth",
            FetchError::Server { .. } => "server",
            FetchError::Parse(_) => "parse",
            FetchError::Protocol(_) => "protocol",
        }
    }

    fn from_status(status: StatusCode, body: &[u8]) -> Self {
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return FetchError::Auth {
                status: status.as_u16(),
            };
        }
        let text = String::from_utf8_lossy(body);
        let message: String = text.chars().take(MAX_ERROR_BODY).collect();
        FetchError::Server {
            status: status.as_u16(),
            message,
        }
    }
}

/// Reject any non-2xx response.
pub fn check_status(response: &HttpResponse) -> Result<(), FetchError> {
    if response.status.is_success() {
        Ok(())
    } else {
        Err(FetchError::from_status(response.status, &response.body))
    }
}
