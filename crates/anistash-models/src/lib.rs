//! Shared data models for the anistash worker.
//!
//! This crate provides Serde-serializable types for:
//! - Queue jobs and their external identity
//! - Queue lifecycle status
//! - Stored records written after a successful upload
//! - Deterministic storage key and path naming

pub mod job;
pub mod naming;
pub mod record;
pub mod status;

pub use job::{Job, JobId, JobIdentity, ModelError, Provider};
pub use naming::{derive_key, derive_path, stream_url, StorageKey, StoragePath, OUTPUT_EXTENSION};
pub use record::StoredRecord;
pub use status::QueueStatus;
