//! Replica storage on Hugging Face dataset repositories.
//!
//! This crate provides:
//! - The [`StorageAccount`] abstraction used by the upload coordinator
//! - A Hub client speaking the preupload / LFS batch / commit protocol
//! - Account slot configuration and repository naming policies

pub mod account;
pub mod client;
pub mod config;
pub mod error;
pub mod naming;

pub use account::{sanitize_username, AccountConfig, StorageAccount, MAX_ACCOUNTS};
pub use client::{fingerprint, FileFingerprint, HfAccount};
pub use config::{StorageConfig, DEFAULT_HF_ENDPOINT};
pub use error::{StorageError, StorageResult};
pub use naming::{GlobalRepo, RepoLayout, RepoNamingPolicy, RepoPerAnime, DEFAULT_REPO_NAME};
