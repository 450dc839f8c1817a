//! Queue error types.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur talking to the queue store.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue configuration error: {0}")]
    Config(String),

    #[error("Request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_row(msg: impl Into<String>) -> Self {
        Self::InvalidRow(msg.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        if status == 429 {
            return Self::RateLimited(retry_after_ms.unwrap_or(1000));
        }
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Network failures, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueueError::Network(_) | QueueError::RateLimited(_) => true,
            QueueError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            QueueError::RateLimited(ms) => Some(*ms),
            _ => None,
        }
    }

    /// HTTP status for metrics, when the error came from a response.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            QueueError::Api { status, .. } => Some(*status),
            QueueError::RateLimited(_) => Some(429),
            QueueError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
