//! Worker metrics.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_CLAIMED_TOTAL: &str = "anistash_jobs_claimed_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "anistash_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "anistash_jobs_failed_total";
    pub const JOBS_SKIPPED_TOTAL: &str = "anistash_jobs_skipped_total";
    pub const JOBS_ACTIVE: &str = "anistash_jobs_active";
    pub const STALE_JOBS_RESET_TOTAL: &str = "anistash_stale_jobs_reset_total";

    pub const DOWNLOAD_DURATION_SECONDS: &str = "anistash_download_duration_seconds";
    pub const UPLOAD_ATTEMPTS_TOTAL: &str = "anistash_upload_attempts_total";
    pub const UPLOAD_DURATION_SECONDS: &str = "anistash_upload_duration_seconds";
}

pub fn record_jobs_claimed(count: usize) {
    counter!(names::JOBS_CLAIMED_TOTAL).increment(count as u64);
}

pub fn record_job_completed(replicas: usize) {
    let labels = [("replicas", replicas.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

pub fn record_job_failed(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record a job dropped because its identity is already being worked on.
pub fn record_job_skipped(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::JOBS_SKIPPED_TOTAL, &labels).increment(1);
}

pub fn set_active_jobs(count: usize) {
    gauge!(names::JOBS_ACTIVE).set(count as f64);
}

pub fn record_stale_reset(count: usize) {
    counter!(names::STALE_JOBS_RESET_TOTAL).increment(count as u64);
}

pub fn record_download_duration(strategy: &str, duration_secs: f64) {
    let labels = [("strategy", strategy.to_string())];
    histogram!(names::DOWNLOAD_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_upload_attempt(slot: u8, success: bool, duration_secs: f64) {
    let labels = [
        ("account", slot.to_string()),
        ("outcome", if success { "success" } else { "failure" }.to_string()),
    ];
    counter!(names::UPLOAD_ATTEMPTS_TOTAL, &labels).increment(1);
    histogram!(names::UPLOAD_DURATION_SECONDS, &labels).record(duration_secs);
}
