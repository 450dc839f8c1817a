//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No storage account is configured; fatal for the job only.
    #[error("No storage accounts configured")]
    NoAccounts,

    #[error("Insufficient disk space: {available_mb} MB free, {required_mb} MB required")]
    InsufficientDisk { available_mb: u64, required_mb: u64 },

    /// The trigger channel is full.
    #[error("Worker is busy, try again later")]
    Busy,

    #[error("Scheduler is not running")]
    SchedulerStopped,

    #[error("Storage error: {0}")]
    Storage(#[from] anistash_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] anistash_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] anistash_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Media(e) => e.is_retryable(),
            WorkerError::Storage(e) => e.is_retryable(),
            WorkerError::Queue(e) => e.is_retryable(),
            WorkerError::Busy => true,
            _ => false,
        }
    }

    /// Failures that another attempt cannot fix.
    pub fn is_permanent(&self) -> bool {
        match self {
            WorkerError::Media(e) => e.is_permanent(),
            WorkerError::NoAccounts | WorkerError::ConfigError(_) => true,
            _ => false,
        }
    }

    /// Short label used as a metrics dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            WorkerError::JobFailed(_) => "job",
            WorkerError::UploadFailed(_) | WorkerError::Storage(_) => "upload",
            WorkerError::ConfigError(_) | WorkerError::NoAccounts => "config",
            WorkerError::InsufficientDisk { .. } => "disk",
            WorkerError::Busy | WorkerError::SchedulerStopped => "scheduler",
            WorkerError::Media(_) => "download",
            WorkerError::Queue(_) => "queue",
            WorkerError::Io(_) => "io",
        }
    }
}
