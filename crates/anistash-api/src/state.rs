//! Application state.

use std::sync::Arc;

use anistash_queue::QueueStore;
use anistash_worker::{JobSubmitter, WorkerStack};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn QueueStore>,
    pub submitter: JobSubmitter,
    pub storage_accounts: usize,
    pub cf_workers_configured: bool,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn QueueStore>,
        submitter: JobSubmitter,
        storage_accounts: usize,
        cf_workers_configured: bool,
    ) -> Self {
        Self {
            config,
            store,
            submitter,
            storage_accounts,
            cf_workers_configured,
        }
    }

    /// State backed by an assembled worker stack.
    pub fn from_stack(config: ApiConfig, stack: &WorkerStack) -> Self {
        Self::new(
            config,
            Arc::clone(&stack.store),
            stack.scheduler.submitter(),
            stack.storage_accounts,
            stack.config.proxy_configured(),
        )
    }
}
