//! Queue-driven episode acquisition worker.
//!
//! This crate provides:
//! - Job processing: download, replicated upload, record
//! - Per-repository commit serialization across storage accounts
//! - A scheduler with deduplication, a concurrency gate and stale recovery
//! - A trigger fast path sharing the scheduler's gate
//! - Graceful shutdown

pub mod active;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod replication;
pub mod scheduler;
pub mod stack;

pub use active::{ActiveJobGuard, ActiveJobs};
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use processor::{truncate_error, JobProcessor};
pub use replication::{RepoLocks, ReplicatedUploader, UploadSummary};
pub use scheduler::{reset_stale_jobs, JobSubmitter, Scheduler, TriggerOutcome};
pub use stack::WorkerStack;
