//! Storage configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::account::AccountConfig;
use crate::naming::{RepoLayout, RepoNamingPolicy, DEFAULT_REPO_NAME};

/// Default Hub endpoint.
pub const DEFAULT_HF_ENDPOINT: &str = "https://huggingface.co";

/// Hub endpoint, repository layout and account slots.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub repo_name: String,
    pub layout: RepoLayout,
    /// Timeout for metadata calls (exists, create, preupload, commit)
    pub api_timeout: Duration,
    /// Timeout for the file body transfer
    pub transfer_timeout: Duration,
    pub accounts: Vec<AccountConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_HF_ENDPOINT.to_string(),
            repo_name: DEFAULT_REPO_NAME.to_string(),
            layout: RepoLayout::Global,
            api_timeout: Duration::from_secs(60),
            transfer_timeout: Duration::from_secs(7200),
            accounts: Vec::new(),
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            endpoint: std::env::var("HF_ENDPOINT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .unwrap_or(defaults.endpoint),
            repo_name: std::env::var("HF_REPO_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.repo_name),
            layout: std::env::var("HF_REPO_LAYOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.layout),
            api_timeout: defaults.api_timeout,
            transfer_timeout: defaults.transfer_timeout,
            accounts: AccountConfig::all_from_env(),
        }
    }

    pub fn naming_policy(&self) -> Arc<dyn RepoNamingPolicy> {
        self.layout.policy(&self.repo_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_global() {
        let config = StorageConfig::default();
        assert_eq!(config.naming_policy().repo_id("u", 5), "u/weaboo-storage");
        assert!(config.accounts.is_empty());
    }
}
