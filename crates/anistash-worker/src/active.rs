//! Process-local registry of identities being worked on.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::metrics::set_active_jobs;

/// Set of active job keys owned by one scheduler.
///
/// The lock is only held for the insert or remove itself.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobs {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `key`. Returns `None` when it is already active.
    pub fn try_acquire(&self, key: impl Into<String>) -> Option<ActiveJobGuard> {
        let key = key.into();
        let mut keys = self.lock();
        if !keys.insert(key.clone()) {
            return None;
        }
        set_active_jobs(keys.len());
        drop(keys);

        Some(ActiveJobGuard {
            keys: self.clone(),
            key,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes its key from the registry when dropped.
#[derive(Debug)]
pub struct ActiveJobGuard {
    keys: ActiveJobs,
    key: String,
}

impl ActiveJobGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        let mut keys = self.keys.lock();
        keys.remove(&self.key);
        set_active_jobs(keys.len());
    }
}
