//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Salt used when `HF_FILE_SALT` is not set.
pub const DEFAULT_FILE_SALT: &str = "weaboo-default-salt";

/// Worker configuration.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Secret mixed into storage keys
    pub file_salt: String,
    /// Optional stream proxy base, without trailing slash
    pub proxy_base: Option<String>,
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Rows claimed per poll
    pub claim_batch: u32,
    pub poll_interval: Duration,
    /// In-flight rows untouched for longer than this are returned to pending
    pub stale_after: Duration,
    /// Minimum free space in the work directory before a job starts
    pub min_free_disk_bytes: u64,
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// Capacity of the trigger channel
    pub trigger_capacity: usize,
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("file_salt", &"<redacted>")
            .field("proxy_base", &self.proxy_base)
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .field("claim_batch", &self.claim_batch)
            .field("poll_interval", &self.poll_interval)
            .field("stale_after", &self.stale_after)
            .field("min_free_disk_bytes", &self.min_free_disk_bytes)
            .field("work_dir", &self.work_dir)
            .field("trigger_capacity", &self.trigger_capacity)
            .finish()
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            file_salt: DEFAULT_FILE_SALT.to_string(),
            proxy_base: None,
            max_concurrent_jobs: 5,
            claim_batch: 5,
            poll_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(2 * 60 * 60), // 2 hours
            min_free_disk_bytes: 2048 * 1024 * 1024,
            work_dir: std::env::temp_dir(),
            trigger_capacity: 64,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            file_salt: std::env::var("HF_FILE_SALT")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.file_salt),
            proxy_base: std::env::var("CLOUDFLARE_WORKERS_URL")
                .ok()
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty()),
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            claim_batch: std::env::var("WORKER_CLAIM_BATCH")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.claim_batch),
            poll_interval: std::env::var("WORKER_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            stale_after: std::env::var("WORKER_STALE_AFTER_MINS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|mins| Duration::from_secs(mins * 60))
                .unwrap_or(defaults.stale_after),
            min_free_disk_bytes: std::env::var("WORKER_MIN_FREE_DISK_MB")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(defaults.min_free_disk_bytes),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            trigger_capacity: std::env::var("WORKER_TRIGGER_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.trigger_capacity),
        }
    }

    /// Whether a stream proxy is configured.
    pub fn proxy_configured(&self) -> bool {
        self.proxy_base.is_some()
    }
}
