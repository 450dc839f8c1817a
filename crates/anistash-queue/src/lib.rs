//! Supabase-backed job queue and record store.
//!
//! This crate provides:
//! - Atomic claiming of pending queue rows
//! - Status transitions and stale-row lookups
//! - Upserts of stored records after replication
//! - Retry with jittered backoff and request metrics

pub mod error;
pub mod metrics;
pub mod retry;
pub mod store;
pub mod supabase;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use error::{QueueError, QueueResult};
pub use retry::{with_retry, RetryConfig};
pub use store::{IdentityStatus, QueueStats, QueueStore, RecordStore, StaleJob};
pub use supabase::{SupabaseConfig, SupabaseStore};

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
