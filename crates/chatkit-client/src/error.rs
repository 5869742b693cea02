//! Error types for chatkit-client

use thiserror::Error;

/// Result type alias using chatkit-client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the agent backend
#[derive(Error, Debug)]
pub enum Error {
    /// Network-level failure (DNS, TLS, connection)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-2xx response with the body read as text
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Stream was cancelled by the user
    #[error("Request aborted")]
    Aborted,

    /// The response body could not be consumed incrementally
    #[error("Stream error: {0}")]
    Stream(String),
}

/// Anti-forgery token expiry, recovered once by refresh-and-retry.
pub const TOKEN_EXPIRED_STATUS: u16 = 419;

impl Error {
    /// Create a status error from a response code and body text.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Whether this is the specific status recovered by a token refresh.
    pub fn is_token_expired(&self) -> bool {
        matches!(self, Error::Status { status, .. } if *status == TOKEN_EXPIRED_STATUS)
    }

    /// Whether this error came from user-initiated cancellation.
    ///
    /// Aborts are settled silently; every other failure becomes an
    /// error-kind transcript entry.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted)
    }
}
