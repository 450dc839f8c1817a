//! Replicated upload of one downloaded file to every storage account.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use anistash_models::{derive_path, stream_url, JobIdentity, StorageKey, StoredRecord, OUTPUT_EXTENSION};
use anistash_queue::RecordStore;
use anistash_storage::{RepoNamingPolicy, StorageAccount, StorageResult};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics::record_upload_attempt;

/// One lock per (account, repository), created on first use and kept.
///
/// Commits to the same repository are serialized; different repositories
/// proceed independently.
#[derive(Debug, Default)]
pub struct RepoLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, slot: u8, repo_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(format!("{}:{}", slot, repo_id))
            .or_default()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of replicating one file.
#[derive(Debug, Clone)]
pub struct UploadSummary {
    /// Accounts that hold the file after this run.
    pub succeeded: usize,
    pub attempted: usize,
    /// Record written for the first account that succeeded.
    pub primary: StoredRecord,
}

/// Pushes a local file to all configured accounts and records the primary copy.
pub struct ReplicatedUploader {
    accounts: Vec<Arc<dyn StorageAccount>>,
    naming: Arc<dyn RepoNamingPolicy>,
    records: Arc<dyn RecordStore>,
    locks: Arc<RepoLocks>,
    proxy_base: Option<String>,
}

impl ReplicatedUploader {
    pub fn new(
        accounts: Vec<Arc<dyn StorageAccount>>,
        naming: Arc<dyn RepoNamingPolicy>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            accounts,
            naming,
            records,
            locks: Arc::new(RepoLocks::new()),
            proxy_base: None,
        }
    }

    pub fn with_proxy_base(mut self, proxy_base: Option<String>) -> Self {
        self.proxy_base = proxy_base;
        self
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn locks(&self) -> &Arc<RepoLocks> {
        &self.locks
    }

    /// Upload `file` to every account, independently.
    ///
    /// Fails only when no account ends up with a recorded copy.
    pub async fn replicate(
        &self,
        file: &Path,
        identity: &JobIdentity,
        key: &StorageKey,
    ) -> WorkerResult<UploadSummary> {
        if self.accounts.is_empty() {
            return Err(WorkerError::NoAccounts);
        }

        let path = derive_path(identity.anime_id, identity.episode, key, OUTPUT_EXTENSION);
        let commit_message = format!("weaboo: add ep{} ({})", identity.episode, identity.provider);

        let mut succeeded = 0;
        let mut primary: Option<StoredRecord> = None;

        for account in &self.accounts {
            let slot = account.slot();
            let repo_id = self.naming.repo_id(account.username(), identity.anime_id);
            let started = Instant::now();

            let direct_url = match self
                .upload_one(account.as_ref(), &repo_id, path.as_str(), file, &commit_message)
                .await
            {
                Ok(url) => url,
                Err(e) => {
                    record_upload_attempt(slot, false, started.elapsed().as_secs_f64());
                    warn!(account = slot, repo = %repo_id, "Upload failed: {}", e);
                    continue;
                }
            };

            record_upload_attempt(slot, true, started.elapsed().as_secs_f64());
            succeeded += 1;
            info!(account = slot, repo = %repo_id, path = %path, "Upload complete");

            if primary.is_none() {
                let record = StoredRecord {
                    identity: identity.clone(),
                    file_key: key.clone(),
                    account_slot: slot,
                    repo_id: repo_id.clone(),
                    path: path.clone(),
                    stream_url: stream_url(self.proxy_base.as_deref(), &direct_url),
                    direct_url,
                };
                // The next successful account retries a failed upsert
                match self.records.upsert_record(&record).await {
                    Ok(()) => {
                        info!(account = slot, "Stored record upserted");
                        primary = Some(record);
                    }
                    Err(e) => warn!(account = slot, "Failed to upsert stored record: {}", e),
                }
            }
        }

        let attempted = self.accounts.len();
        match primary {
            Some(primary) => {
                info!(succeeded, attempted, "Replication finished");
                Ok(UploadSummary {
                    succeeded,
                    attempted,
                    primary,
                })
            }
            None if succeeded == 0 => Err(WorkerError::upload_failed(format!(
                "Upload failed for all {} storage accounts",
                attempted
            ))),
            None => Err(WorkerError::job_failed(format!(
                "Uploaded to {} of {} accounts but the stored record could not be written",
                succeeded, attempted
            ))),
        }
    }

    async fn upload_one(
        &self,
        account: &dyn StorageAccount,
        repo_id: &str,
        path_in_repo: &str,
        file: &Path,
        commit_message: &str,
    ) -> StorageResult<String> {
        if !account.repo_exists(repo_id).await? {
            info!(account = account.slot(), repo = %repo_id, "Creating public dataset repository");
            account.create_repo(repo_id, false).await?;
        }

        let lock = self.locks.lock_for(account.slot(), repo_id);
        let _held = lock.lock().await;
        account
            .upload(repo_id, path_in_repo, file, commit_message)
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anistash_models::Provider;
    use anistash_queue::MemoryStore;
    use anistash_storage::{GlobalRepo, StorageError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Storage account double recording every call.
    #[derive(Debug, Default)]
    pub(crate) struct FakeAccount {
        pub slot: u8,
        pub username: String,
        pub fail_upload: bool,
        pub existing: Mutex<Vec<String>>,
        pub created: Mutex<Vec<(String, bool)>>,
        pub uploads: Mutex<Vec<(String, String, String)>>,
        pub upload_delay: Duration,
        pub in_commit: AtomicUsize,
        pub max_in_commit: AtomicUsize,
    }

    impl FakeAccount {
        pub(crate) fn new(slot: u8, username: &str) -> Self {
            Self {
                slot,
                username: username.to_string(),
                ..Default::default()
            }
        }

        pub(crate) fn failing(slot: u8, username: &str) -> Self {
            Self {
                fail_upload: true,
                ..Self::new(slot, username)
            }
        }
    }

    #[async_trait]
    impl StorageAccount for FakeAccount {
        fn slot(&self) -> u8 {
            self.slot
        }

        fn username(&self) -> &str {
            &self.username
        }

        async fn repo_exists(&self, repo_id: &str) -> StorageResult<bool> {
            Ok(self.existing.lock().unwrap().iter().any(|r| r == repo_id))
        }

        async fn create_repo(&self, repo_id: &str, private: bool) -> StorageResult<()> {
            self.created.lock().unwrap().push((repo_id.to_string(), private));
            self.existing.lock().unwrap().push(repo_id.to_string());
            Ok(())
        }

        async fn upload(
            &self,
            repo_id: &str,
            path_in_repo: &str,
            _local_file: &Path,
            commit_message: &str,
        ) -> StorageResult<String> {
            let now = self.in_commit.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_commit.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.upload_delay).await;
            self.in_commit.fetch_sub(1, Ordering::SeqCst);

            if self.fail_upload {
                return Err(StorageError::api(500, "backend down"));
            }
            self.uploads.lock().unwrap().push((
                repo_id.to_string(),
                path_in_repo.to_string(),
                commit_message.to_string(),
            ));
            Ok(self.public_url(repo_id, path_in_repo))
        }

        fn public_url(&self, repo_id: &str, path_in_repo: &str) -> String {
            format!("https://hub.test/datasets/{}/resolve/main/{}", repo_id, path_in_repo)
        }
    }

    fn uploader(
        accounts: Vec<Arc<FakeAccount>>,
        store: Arc<MemoryStore>,
    ) -> ReplicatedUploader {
        let accounts = accounts
            .into_iter()
            .map(|a| a as Arc<dyn StorageAccount>)
            .collect();
        ReplicatedUploader::new(
            accounts,
            Arc::new(GlobalRepo {
                name: "weaboo-storage".into(),
            }),
            store,
        )
    }

    fn identity() -> JobIdentity {
        JobIdentity::new(55825, 1, Provider::Animasu).with_resolution("720p")
    }

    #[test]
    fn test_repo_locks_are_shared_per_pair() {
        let locks = RepoLocks::new();
        let a = locks.lock_for(1, "u/weaboo-storage");
        let b = locks.lock_for(1, "u/weaboo-storage");
        let c = locks.lock_for(2, "u/weaboo-storage");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_success_records_first_success() {
        let store = Arc::new(MemoryStore::new());
        let first = Arc::new(FakeAccount::failing(1, "alpha"));
        let second = Arc::new(FakeAccount::new(2, "beta"));
        let third = Arc::new(FakeAccount::new(3, "gamma"));
        let up = uploader(vec![first.clone(), second.clone(), third.clone()], store.clone());

        let key = identity().storage_key("salt");
        let summary = up
            .replicate(Path::new("/tmp/x.mp4"), &identity(), &key)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.primary.account_slot, 2);
        assert_eq!(summary.primary.repo_id, "beta/weaboo-storage");

        let record = store.record_for(&identity()).unwrap();
        assert_eq!(record.account_slot, 2);
        assert_eq!(
            record.direct_url,
            format!("https://hub.test/datasets/beta/weaboo-storage/resolve/main/55825/ep1/{}.mp4", key)
        );
        assert_eq!(record.stream_url, record.direct_url);

        let uploads = third.uploads.lock().unwrap();
        assert_eq!(uploads[0].2, "weaboo: add ep1 (animasu)");
        // Missing repositories are created public
        assert_eq!(
            second.created.lock().unwrap()[0],
            ("beta/weaboo-storage".to_string(), false)
        );
    }

    #[tokio::test]
    async fn test_all_failures_leave_no_record() {
        let store = Arc::new(MemoryStore::new());
        let up = uploader(
            vec![
                Arc::new(FakeAccount::failing(1, "a")),
                Arc::new(FakeAccount::failing(2, "b")),
            ],
            store.clone(),
        );

        let key = identity().storage_key("salt");
        let err = up
            .replicate(Path::new("/tmp/x.mp4"), &identity(), &key)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::UploadFailed(_)));
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upsert_is_retried_by_next_account() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_upserts(1);
        let up = uploader(
            vec![Arc::new(FakeAccount::new(1, "a")), Arc::new(FakeAccount::new(2, "b"))],
            store.clone(),
        );

        let key = identity().storage_key("salt");
        let summary = up
            .replicate(Path::new("/tmp/x.mp4"), &identity(), &key)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(store.record_for(&identity()).unwrap().account_slot, 2);
    }

    #[tokio::test]
    async fn test_stream_url_uses_proxy() {
        let store = Arc::new(MemoryStore::new());
        let up = uploader(vec![Arc::new(FakeAccount::new(1, "a"))], store.clone())
            .with_proxy_base(Some("https://proxy.workers.dev".into()));

        let key = identity().storage_key("salt");
        let summary = up
            .replicate(Path::new("/tmp/x.mp4"), &identity(), &key)
            .await
            .unwrap();

        assert!(summary
            .primary
            .stream_url
            .starts_with("https://proxy.workers.dev/proxy?url=https%3A%2F%2Fhub.test"));
    }

    #[tokio::test]
    async fn test_no_accounts() {
        let up = uploader(Vec::new(), Arc::new(MemoryStore::new()));
        let key = identity().storage_key("salt");
        let err = up
            .replicate(Path::new("/tmp/x.mp4"), &identity(), &key)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::NoAccounts));
    }

    #[tokio::test]
    async fn test_commits_to_same_repo_are_serialized() {
        let store = Arc::new(MemoryStore::new());
        let account = Arc::new(FakeAccount {
            upload_delay: Duration::from_millis(30),
            ..FakeAccount::new(1, "a")
        });
        let up = Arc::new(uploader(vec![account.clone()], store));

        let mut handles = Vec::new();
        for ep in 1..=3 {
            let up = up.clone();
            handles.push(tokio::spawn(async move {
                let identity = JobIdentity::new(9, ep, Provider::Samehadaku);
                let key = identity.storage_key("salt");
                up.replicate(Path::new("/tmp/x.mp4"), &identity, &key).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(account.max_in_commit.load(Ordering::SeqCst), 1);
        assert_eq!(account.uploads.lock().unwrap().len(), 3);
    }
}
