//! Assembly of the production worker from the environment.

use std::sync::Arc;

use tracing::{info, warn};

use anistash_media::{FetcherConfig, MediaFetcher};
use anistash_queue::{QueueStore, SupabaseStore};
use anistash_storage::{HfAccount, StorageAccount, StorageConfig};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::processor::JobProcessor;
use crate::replication::ReplicatedUploader;
use crate::scheduler::Scheduler;

/// Everything a binary needs to run and report on the worker.
pub struct WorkerStack {
    pub config: WorkerConfig,
    pub store: Arc<dyn QueueStore>,
    pub scheduler: Arc<Scheduler>,
    pub storage_accounts: usize,
}

impl WorkerStack {
    /// Build the Supabase store, Hub accounts, fetcher and scheduler.
    ///
    /// Missing storage accounts are not an error here: jobs fail individually.
    pub fn from_env() -> WorkerResult<Self> {
        let config = WorkerConfig::from_env();
        let storage = StorageConfig::from_env();
        let supabase = Arc::new(SupabaseStore::from_env()?);

        let accounts: Vec<Arc<dyn StorageAccount>> = HfAccount::from_config(&storage)?
            .into_iter()
            .map(|account| Arc::new(account) as Arc<dyn StorageAccount>)
            .collect();
        if accounts.is_empty() {
            warn!("No storage accounts configured; every job will fail until one is added");
        } else {
            info!(
                "Storage accounts: {} (repo layout {:?}, repo name {})",
                accounts.len(),
                storage.layout,
                storage.repo_name
            );
        }
        let storage_accounts = accounts.len();

        let uploader = ReplicatedUploader::new(accounts, storage.naming_policy(), supabase.clone())
            .with_proxy_base(config.proxy_base.clone());
        let fetcher = MediaFetcher::new(FetcherConfig::from_env())?;

        let store: Arc<dyn QueueStore> = supabase;
        let processor = Arc::new(JobProcessor::new(
            config.clone(),
            store.clone(),
            Arc::new(fetcher),
            Arc::new(uploader),
        ));
        let scheduler = Arc::new(Scheduler::new(config.clone(), store.clone(), processor));

        Ok(Self {
            config,
            store,
            scheduler,
            storage_accounts,
        })
    }
}
