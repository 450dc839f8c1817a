//! Durable result of a processed job.

use serde::{Deserialize, Serialize};

use crate::{JobIdentity, StorageKey, StoragePath};

/// Where the primary copy of an identity lives.
///
/// One record per identity; re-processing overwrites it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub identity: JobIdentity,
    pub file_key: StorageKey,
    /// 1-based storage account slot.
    pub account_slot: u8,
    pub repo_id: String,
    pub path: StoragePath,
    pub direct_url: String,
    pub stream_url: String,
}
