//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};

use anistash_models::Job;

/// Job logger for structured logging with consistent formatting.
///
/// Every event carries the queue row id (or `trigger` for rowless jobs),
/// the operation name and the identity of the content being fetched.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
    identity: String,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    pub fn new(job: &Job, operation: &str) -> Self {
        Self {
            job_id: job.log_id(),
            operation: operation.to_string(),
            identity: job.identity().active_key(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            identity = %self.identity,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            identity = %self.identity,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            identity = %self.identity,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation,
            identity = %self.identity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anistash_models::{JobId, Provider};

    #[test]
    fn test_job_logger_creation() {
        let job = Job::new(5, 2, Provider::Animasu, "https://x/y.mp4")
            .with_job_id(JobId::from_string("row-9"));
        let logger = JobLogger::new(&job, "fetch_and_replicate");

        assert_eq!(logger.job_id(), "row-9");
        assert_eq!(logger.operation(), "fetch_and_replicate");
    }

    #[test]
    fn test_rowless_job_logs_as_trigger() {
        let job = Job::new(5, 2, Provider::Samehadaku, "https://x/y.mp4");
        assert_eq!(JobLogger::new(&job, "op").job_id(), "trigger");
    }
}
