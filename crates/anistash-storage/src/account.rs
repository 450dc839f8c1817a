//! Storage accounts and their configuration.

use async_trait::async_trait;
use std::path::Path;
use tracing::warn;

use crate::error::{StorageError, StorageResult};

/// Number of account slots read from the environment.
pub const MAX_ACCOUNTS: u8 = 5;

/// One blob-storage account able to hold replicas.
#[async_trait]
pub trait StorageAccount: Send + Sync {
    /// 1-based configuration slot.
    fn slot(&self) -> u8;

    fn username(&self) -> &str;

    async fn repo_exists(&self, repo_id: &str) -> StorageResult<bool>;

    /// Create `repo_id`. Creating a repository that already exists succeeds.
    async fn create_repo(&self, repo_id: &str, private: bool) -> StorageResult<()>;

    /// Commit `local_file` at `path_in_repo` and return its public URL.
    async fn upload(
        &self,
        repo_id: &str,
        path_in_repo: &str,
        local_file: &Path,
        commit_message: &str,
    ) -> StorageResult<String>;

    /// URL serving `path_in_repo` without credentials.
    fn public_url(&self, repo_id: &str, path_in_repo: &str) -> String;
}

/// Credentials for one account slot.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub slot: u8,
    pub username: String,
    pub token: String,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("slot", &self.slot)
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl AccountConfig {
    /// Build a slot from raw values. `Ok(None)` when the slot is not configured.
    pub fn from_values(
        slot: u8,
        token: Option<String>,
        username: Option<String>,
    ) -> StorageResult<Option<Self>> {
        let token = token.map(|t| t.trim().to_string()).unwrap_or_default();
        let raw_username = username.unwrap_or_default();

        if token.is_empty() || raw_username.trim().is_empty() {
            return Ok(None);
        }

        let username = sanitize_username(&raw_username).ok_or_else(|| {
            StorageError::config_error(format!(
                "Storage account {} username {:?} has no usable characters",
                slot, raw_username
            ))
        })?;

        Ok(Some(Self {
            slot,
            username,
            token,
        }))
    }

    /// Read `HF_TOKEN_STORAGE_{slot}` and `HF_STORAGE_USERNAME_{slot}`.
    pub fn from_env(slot: u8) -> StorageResult<Option<Self>> {
        Self::from_values(
            slot,
            std::env::var(format!("HF_TOKEN_STORAGE_{}", slot)).ok(),
            std::env::var(format!("HF_STORAGE_USERNAME_{}", slot)).ok(),
        )
    }

    /// Every valid slot in the environment. Invalid slots are skipped.
    pub fn all_from_env() -> Vec<Self> {
        (1..=MAX_ACCOUNTS)
            .filter_map(|slot| match Self::from_env(slot) {
                Ok(account) => account,
                Err(e) => {
                    warn!(slot = slot, "Skipping storage account: {}", e);
                    None
                }
            })
            .collect()
    }
}

/// Normalise a username into a repository namespace.
///
/// Spaces become `-`, characters outside `[A-Za-z0-9-_.]` are dropped and
/// leading or trailing `-`/`.` are trimmed.
pub fn sanitize_username(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c == ' ' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();

    let trimmed = cleaned.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
