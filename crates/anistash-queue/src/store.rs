//! Queue and record store abstractions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use anistash_models::{Job, JobId, JobIdentity, QueueStatus, StoredRecord};

use crate::error::QueueResult;

/// Queue row currently holding an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityStatus {
    pub job_id: JobId,
    pub status: QueueStatus,
}

/// In-flight row that may have been abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleJob {
    pub job_id: JobId,
    pub status: QueueStatus,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Row counts per status plus the number of stored records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    #[serde(rename = "queue")]
    pub by_status: BTreeMap<String, u64>,
    pub archived: u64,
}

/// Persistent, atomically claimable job table.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Move up to `limit` pending rows to `downloading` and return them.
    ///
    /// The transition is a compare-and-swap inside the store, so concurrent
    /// callers never receive the same row.
    async fn claim_pending(&self, limit: u32) -> QueueResult<Vec<Job>>;

    async fn set_status(
        &self,
        job_id: &JobId,
        status: QueueStatus,
        error: Option<&str>,
    ) -> QueueResult<()>;

    async fn get_status_by_identity(
        &self,
        identity: &JobIdentity,
    ) -> QueueResult<Option<IdentityStatus>>;

    /// Rows in `statuses` last updated before `older_than` (or never).
    async fn list_stale(
        &self,
        statuses: &[QueueStatus],
        older_than: DateTime<Utc>,
    ) -> QueueResult<Vec<StaleJob>>;

    async fn stats(&self) -> QueueResult<QueueStats>;
}

/// Durable results keyed by identity.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or overwrite the record for `record.identity`.
    async fn upsert_record(&self, record: &StoredRecord) -> QueueResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_wire_shape() {
        let mut stats = QueueStats::default();
        stats.by_status.insert("pending".into(), 3);
        stats.archived = 7;

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["queue"]["pending"], 3);
        assert_eq!(json["archived"], 7);
    }
}
