//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while fetching a source.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("aria2c not found in PATH")]
    Aria2cNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    /// The source URL cannot be used as given (unparseable link, missing key).
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// An embed page no longer yields a playable stream.
    #[error("Re-resolution failed: {0}")]
    ResolveFailed(String),

    #[error("Mega API returned error code {code}")]
    MegaApi { code: i64 },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Output file missing or empty: {0}")]
    EmptyOutput(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    pub fn invalid_source(message: impl Into<String>) -> Self {
        Self::InvalidSource(message.into())
    }

    pub fn resolve_failed(message: impl Into<String>) -> Self {
        Self::ResolveFailed(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Structurally absent input; retrying cannot help.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            MediaError::InvalidSource(_)
                | MediaError::ResolveFailed(_)
                | MediaError::MegaApi { .. }
                | MediaError::FfmpegNotFound
                | MediaError::Aria2cNotFound
        )
    }

    /// Transient network-side failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MediaError::Http(_) | MediaError::Timeout(_) | MediaError::RateLimited(_)
        )
    }
}
