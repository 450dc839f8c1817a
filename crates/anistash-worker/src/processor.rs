//! End-to-end processing of one job: download, replicate, record.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn, Instrument};

use anistash_media::{available_space, SourceFetcher};
use anistash_models::{Job, QueueStatus, StorageKey, OUTPUT_EXTENSION};
use anistash_queue::QueueStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics::{record_download_duration, record_job_completed, record_job_failed};
use crate::replication::{ReplicatedUploader, UploadSummary};

/// Longest error message written to a queue row.
pub const MAX_ERROR_CHARS: usize = 500;

/// Truncate an error message on a character boundary.
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_CHARS).collect()
}

/// Drives a job through download, upload and record.
pub struct JobProcessor {
    config: WorkerConfig,
    queue: Arc<dyn QueueStore>,
    fetcher: Arc<dyn SourceFetcher>,
    uploader: Arc<ReplicatedUploader>,
}

impl JobProcessor {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn QueueStore>,
        fetcher: Arc<dyn SourceFetcher>,
        uploader: Arc<ReplicatedUploader>,
    ) -> Self {
        Self {
            config,
            queue,
            fetcher,
            uploader,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn account_count(&self) -> usize {
        self.uploader.account_count()
    }

    /// Process `job` to completion.
    ///
    /// Every failure is recorded on the queue row (when the job has one) and
    /// returned; nothing escapes as a panic.
    pub async fn process(&self, job: &Job) -> WorkerResult<UploadSummary> {
        let logger = JobLogger::new(job, "fetch_and_replicate");
        let span = logger.create_span();

        async {
            logger.log_start(&job.source_url);

            let result = self.run(job, &logger).await;
            match &result {
                Ok(summary) => {
                    self.update_status(job, QueueStatus::Ready, None).await;
                    record_job_completed(summary.succeeded);
                    logger.log_completion(&format!(
                        "{}/{} accounts uploaded",
                        summary.succeeded, summary.attempted
                    ));
                }
                Err(e) => {
                    let message = truncate_error(&e.to_string());
                    self.update_status(job, QueueStatus::Failed, Some(&message))
                        .await;
                    record_job_failed(e.reason());
                    logger.log_error(&message);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, job: &Job, logger: &JobLogger) -> WorkerResult<UploadSummary> {
        self.check_disk(logger)?;

        if self.uploader.account_count() == 0 {
            return Err(WorkerError::NoAccounts);
        }

        let key = job.identity().storage_key(&self.config.file_salt);
        let workspace = tempfile::Builder::new()
            .prefix("weaboo_")
            .tempdir_in(&self.config.work_dir)?;

        let result = self.fetch_and_replicate(job, &key, workspace.path(), logger).await;

        let dir = workspace.path().to_path_buf();
        match workspace.close() {
            Ok(()) => debug!("Cleaned up temp dir {}", dir.display()),
            Err(e) => warn!("Failed to remove temp dir {}: {}", dir.display(), e),
        }

        result
    }

    async fn fetch_and_replicate(
        &self,
        job: &Job,
        key: &StorageKey,
        workspace: &Path,
        logger: &JobLogger,
    ) -> WorkerResult<UploadSummary> {
        let output = workspace.join(format!("{}.{}", key, OUTPUT_EXTENSION));

        self.update_status(job, QueueStatus::Downloading, None).await;
        let started = Instant::now();
        let kind = self.fetcher.fetch(&job.source_url, &output).await?;
        record_download_duration(kind.as_str(), started.elapsed().as_secs_f64());

        let size = tokio::fs::metadata(&output).await?.len();
        logger.log_progress(&format!(
            "Downloaded {:.1} MB via {}",
            size as f64 / (1024.0 * 1024.0),
            kind
        ));

        self.update_status(job, QueueStatus::Uploading, None).await;
        self.uploader
            .replicate(&output, &job.identity(), key)
            .await
    }

    fn check_disk(&self, logger: &JobLogger) -> WorkerResult<()> {
        let required = self.config.min_free_disk_bytes;
        match available_space(&self.config.work_dir) {
            Ok(available) if available < required => Err(WorkerError::InsufficientDisk {
                available_mb: available / (1024 * 1024),
                required_mb: required / (1024 * 1024),
            }),
            Ok(_) => Ok(()),
            Err(e) => {
                logger.log_warning(&format!(
                    "Could not read free space of {}: {}",
                    self.config.work_dir.display(),
                    e
                ));
                Ok(())
            }
        }
    }

    /// Write a status for rowed jobs. Failures are logged only.
    async fn update_status(&self, job: &Job, status: QueueStatus, error: Option<&str>) {
        let Some(job_id) = &job.job_id else {
            return;
        };
        if let Err(e) = self.queue.set_status(job_id, status, error).await {
            warn!(job_id = %job_id, status = %status, "Failed to update queue status: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::replication::tests::FakeAccount;
    use anistash_media::{MediaError, MediaResult, SourceKind};
    use anistash_models::Provider;
    use anistash_queue::MemoryStore;
    use anistash_storage::{GlobalRepo, StorageAccount};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Fetcher double that writes a small file, or fails.
    #[derive(Debug, Default)]
    pub(crate) struct FakeFetcher {
        pub fail_with: Option<String>,
        pub delay: Duration,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl SourceFetcher for FakeFetcher {
        async fn fetch(&self, _source_url: &str, destination: &Path) -> MediaResult<SourceKind> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if let Some(message) = &self.fail_with {
                return Err(MediaError::download_failed(message.clone()));
            }
            tokio::fs::write(destination, b"episode bytes").await?;
            Ok(SourceKind::Direct)
        }
    }

    pub(crate) struct Harness {
        pub store: Arc<MemoryStore>,
        pub fetcher: Arc<FakeFetcher>,
        pub processor: Arc<JobProcessor>,
        pub work_dir: TempDir,
    }

    pub(crate) fn harness(
        fetcher: FakeFetcher,
        accounts: Vec<Arc<FakeAccount>>,
        tweak: impl FnOnce(&mut WorkerConfig),
    ) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(fetcher);
        let work_dir = TempDir::new().unwrap();

        let mut config = WorkerConfig {
            work_dir: work_dir.path().to_path_buf(),
            min_free_disk_bytes: 0,
            file_salt: "salt".into(),
            ..WorkerConfig::default()
        };
        tweak(&mut config);

        let accounts = accounts
            .into_iter()
            .map(|a| a as Arc<dyn StorageAccount>)
            .collect();
        let uploader = ReplicatedUploader::new(
            accounts,
            Arc::new(GlobalRepo {
                name: "weaboo-storage".into(),
            }),
            store.clone(),
        );
        let processor = Arc::new(JobProcessor::new(
            config,
            store.clone(),
            fetcher.clone(),
            Arc::new(uploader),
        ));

        Harness {
            store,
            fetcher,
            processor,
            work_dir,
        }
    }

    pub(crate) fn job(episode: i32) -> Job {
        Job::new(55825, episode, Provider::Animasu, "https://files.example/ep.mp4")
            .with_resolution("720p")
    }

    fn work_dir_is_empty(h: &Harness) -> bool {
        std::fs::read_dir(h.work_dir.path()).unwrap().next().is_none()
    }

    #[test]
    fn test_truncate_error_is_char_safe() {
        let long = "é".repeat(800);
        let truncated = truncate_error(&long);
        assert_eq!(truncated.chars().count(), MAX_ERROR_CHARS);
        assert_eq!(truncate_error("short"), "short");
    }

    #[tokio::test]
    async fn test_success_walks_status_to_ready() {
        let h = harness(
            FakeFetcher::default(),
            vec![Arc::new(FakeAccount::new(1, "alpha"))],
            |_| {},
        );
        let id = h.store.insert(job(1));
        let claimed = h.store.claim_pending(1).await.unwrap();

        let summary = h.processor.process(&claimed[0]).await.unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(
            h.store.history(&id),
            vec![
                QueueStatus::Pending,
                QueueStatus::Downloading,
                QueueStatus::Downloading,
                QueueStatus::Uploading,
                QueueStatus::Ready,
            ]
        );
        assert!(h.store.record_for(&job(1).identity()).is_some());
        assert!(work_dir_is_empty(&h));
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_failed_with_truncated_error() {
        let account = Arc::new(FakeAccount::new(1, "alpha"));
        let h = harness(
            FakeFetcher {
                fail_with: Some("x".repeat(2000)),
                ..Default::default()
            },
            vec![account.clone()],
            |_| {},
        );
        let id = h.store.insert(job(1));
        let claimed = h.store.claim_pending(1).await.unwrap();

        tokio_test::assert_err!(h.processor.process(&claimed[0]).await);

        assert_eq!(h.store.status_of(&id), Some(QueueStatus::Failed));
        assert_eq!(h.store.error_of(&id).unwrap().chars().count(), MAX_ERROR_CHARS);
        assert!(account.uploads.lock().unwrap().is_empty());
        assert!(h.store.records().is_empty());
        assert!(work_dir_is_empty(&h));
    }

    #[tokio::test]
    async fn test_insufficient_disk_fails_before_fetching() {
        let h = harness(
            FakeFetcher::default(),
            vec![Arc::new(FakeAccount::new(1, "alpha"))],
            |c| c.min_free_disk_bytes = u64::MAX,
        );
        let id = h.store.insert(job(1));
        let claimed = h.store.claim_pending(1).await.unwrap();

        let err = h.processor.process(&claimed[0]).await.unwrap_err();

        assert!(matches!(err, WorkerError::InsufficientDisk { .. }));
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(h
            .store
            .error_of(&id)
            .unwrap()
            .starts_with("Insufficient disk space"));
    }

    #[tokio::test]
    async fn test_no_accounts_fails_job() {
        let h = harness(FakeFetcher::default(), Vec::new(), |_| {});
        let id = h.store.insert(job(1));
        let claimed = h.store.claim_pending(1).await.unwrap();

        h.processor.process(&claimed[0]).await.unwrap_err();

        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.store.error_of(&id).as_deref(),
            Some("No storage accounts configured")
        );
    }

    #[tokio::test]
    async fn test_all_accounts_failing_marks_failed() {
        let h = harness(
            FakeFetcher::default(),
            vec![
                Arc::new(FakeAccount::failing(1, "a")),
                Arc::new(FakeAccount::failing(2, "b")),
            ],
            |_| {},
        );
        let id = h.store.insert(job(1));
        let claimed = h.store.claim_pending(1).await.unwrap();

        h.processor.process(&claimed[0]).await.unwrap_err();

        assert_eq!(h.store.status_of(&id), Some(QueueStatus::Failed));
        assert!(h.store.records().is_empty());
    }

    #[tokio::test]
    async fn test_reprocessing_upserts_single_record() {
        let h = harness(
            FakeFetcher::default(),
            vec![Arc::new(FakeAccount::new(1, "alpha"))],
            |_| {},
        );

        h.processor.process(&job(1)).await.unwrap();
        h.processor.process(&job(1)).await.unwrap();

        assert_eq!(h.store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_rowless_job_never_touches_queue() {
        let h = harness(
            FakeFetcher::default(),
            vec![Arc::new(FakeAccount::new(1, "alpha"))],
            |_| {},
        );
        let other = h.store.insert(job(2));

        h.processor.process(&job(1)).await.unwrap();

        assert_eq!(h.store.history(&other), vec![QueueStatus::Pending]);
        assert!(h.store.record_for(&job(1).identity()).is_some());
    }
}
