//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage configuration error: {0}")]
    ConfigError(String),

    #[error("Repository creation failed: {0}")]
    CreateFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// The backend rejected a commit because the branch moved underneath it.
    #[error("Commit conflict on {0}")]
    Conflict(String),

    #[error("Hub API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn create_failed(msg: impl Into<String>) -> Self {
        Self::CreateFailed(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Transient failure worth another attempt later.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Http(e) => e.is_timeout() || e.is_connect(),
            StorageError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = StorageError::api(403, "forbidden");
        assert!(err.to_string().contains("403"));
        assert!(StorageError::Conflict("u/r".into()).to_string().contains("u/r"));
    }

    #[test]
    fn test_retryable() {
        assert!(StorageError::api(503, "busy").is_retryable());
        assert!(StorageError::api(429, "slow down").is_retryable());
        assert!(!StorageError::api(401, "nope").is_retryable());
        assert!(!StorageError::Conflict("u/r".into()).is_retryable());
    }
}
