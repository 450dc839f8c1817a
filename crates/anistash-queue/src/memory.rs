//! In-process store for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use anistash_models::{Job, JobId, JobIdentity, QueueStatus, StoredRecord};

use crate::error::{QueueError, QueueResult};
use crate::store::{IdentityStatus, QueueStats, QueueStore, RecordStore, StaleJob};

#[derive(Debug, Clone)]
struct Row {
    job: Job,
    status: QueueStatus,
    error: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    history: Vec<QueueStatus>,
}

#[derive(Debug, Default)]
struct Inner {
    rows: Vec<Row>,
    records: Vec<StoredRecord>,
    next_id: u64,
    fail_upserts: u32,
}

/// Queue and record store held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a pending row, assigning an id when the job has none.
    pub fn insert(&self, job: Job) -> JobId {
        self.insert_with(job, QueueStatus::Pending, Some(Utc::now()))
    }

    pub fn insert_with(
        &self,
        mut job: Job,
        status: QueueStatus,
        updated_at: Option<DateTime<Utc>>,
    ) -> JobId {
        let mut inner = self.lock();
        let id = match job.job_id.clone() {
            Some(id) => id,
            None => {
                inner.next_id += 1;
                JobId::from_string(inner.next_id.to_string())
            }
        };
        job.job_id = Some(id.clone());
        inner.rows.push(Row {
            job,
            status,
            error: None,
            updated_at,
            history: vec![status],
        });
        id
    }

    /// Make the next `count` upserts fail.
    pub fn fail_next_upserts(&self, count: u32) {
        self.lock().fail_upserts = count;
    }

    pub fn status_of(&self, id: &JobId) -> Option<QueueStatus> {
        self.find(id, |row| row.status)
    }

    pub fn error_of(&self, id: &JobId) -> Option<String> {
        self.find(id, |row| row.error.clone()).flatten()
    }

    /// Every status the row has held, oldest first.
    pub fn history(&self, id: &JobId) -> Vec<QueueStatus> {
        self.find(id, |row| row.history.clone()).unwrap_or_default()
    }

    pub fn records(&self) -> Vec<StoredRecord> {
        self.lock().records.clone()
    }

    pub fn record_for(&self, identity: &JobIdentity) -> Option<StoredRecord> {
        self.lock()
            .records
            .iter()
            .find(|r| &r.identity == identity)
            .cloned()
    }

    fn find<T>(&self, id: &JobId, f: impl FnOnce(&Row) -> T) -> Option<T> {
        self.lock()
            .rows
            .iter()
            .find(|row| row.job.job_id.as_ref() == Some(id))
            .map(f)
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn claim_pending(&self, limit: u32) -> QueueResult<Vec<Job>> {
        let mut inner = self.lock();
        let now = Utc::now();
        let mut claimed = Vec::new();

        for row in inner.rows.iter_mut() {
            if claimed.len() as u32 >= limit {
                break;
            }
            if row.status == QueueStatus::Pending {
                row.status = QueueStatus::Downloading;
                row.updated_at = Some(now);
                row.history.push(QueueStatus::Downloading);
                claimed.push(row.job.clone());
            }
        }

        Ok(claimed)
    }

    async fn set_status(
        &self,
        job_id: &JobId,
        status: QueueStatus,
        error: Option<&str>,
    ) -> QueueResult<()> {
        let mut inner = self.lock();
        let row = inner
            .rows
            .iter_mut()
            .find(|row| row.job.job_id.as_ref() == Some(job_id))
            .ok_or_else(|| QueueError::from_http_status(404, format!("no row {}", job_id), None))?;

        row.status = status;
        row.error = error.map(str::to_string);
        row.updated_at = Some(Utc::now());
        row.history.push(status);
        Ok(())
    }

    async fn get_status_by_identity(
        &self,
        identity: &JobIdentity,
    ) -> QueueResult<Option<IdentityStatus>> {
        Ok(self
            .lock()
            .rows
            .iter()
            .find(|row| &row.job.identity() == identity)
            .and_then(|row| {
                Some(IdentityStatus {
                    job_id: row.job.job_id.clone()?,
                    status: row.status,
                })
            }))
    }

    async fn list_stale(
        &self,
        statuses: &[QueueStatus],
        older_than: DateTime<Utc>,
    ) -> QueueResult<Vec<StaleJob>> {
        Ok(self
            .lock()
            .rows
            .iter()
            .filter(|row| statuses.contains(&row.status))
            .filter(|row| row.updated_at.map_or(true, |at| at < older_than))
            .filter_map(|row| {
                Some(StaleJob {
                    job_id: row.job.job_id.clone()?,
                    status: row.status,
                    updated_at: row.updated_at,
                })
            })
            .collect())
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let inner = self.lock();
        let mut by_status = BTreeMap::new();
        for row in &inner.rows {
            *by_status.entry(row.status.to_string()).or_insert(0) += 1;
        }
        Ok(QueueStats {
            by_status,
            archived: inner.records.len() as u64,
        })
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_record(&self, record: &StoredRecord) -> QueueResult<()> {
        let mut inner = self.lock();
        if inner.fail_upserts > 0 {
            inner.fail_upserts -= 1;
            return Err(QueueError::from_http_status(503, "upsert unavailable", None));
        }

        match inner
            .records
            .iter_mut()
            .find(|r| r.identity == record.identity)
        {
            Some(existing) => *existing = record.clone(),
            None => inner.records.push(record.clone()),
        }
        Ok(())
    }
}
