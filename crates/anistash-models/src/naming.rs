//! Deterministic storage naming.
//!
//! Stored files are named after a salted digest of the job identity so the
//! public repositories cannot be enumerated by guessing episode numbers,
//! while re-processing the same identity always lands on the same path.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Container extension of every stored file. Sources are always remuxed to mp4.
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Placeholder used in the digest input when a job carries no resolution.
const UNKNOWN_RESOLUTION: &str = "unknown";

/// Number of hex characters kept from the digest.
const KEY_LENGTH: usize = 32;

/// Obfuscated file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a stored file inside a repository: `{anime_id}/ep{episode}/{key}.{ext}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoragePath(String);

impl StoragePath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the storage key for an identity tuple.
pub fn derive_key(
    salt: &str,
    anime_id: i64,
    episode: i32,
    provider: &str,
    resolution: Option<&str>,
) -> StorageKey {
    let raw = format!(
        "{}:{}:{}:{}:{}",
        salt,
        anime_id,
        episode,
        provider,
        resolution.unwrap_or(UNKNOWN_RESOLUTION)
    );
    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    StorageKey(digest[..KEY_LENGTH].to_string())
}

/// Build the in-repository path for a stored file.
pub fn derive_path(anime_id: i64, episode: i32, key: &StorageKey, ext: &str) -> StoragePath {
    StoragePath(format!("{}/ep{}/{}.{}", anime_id, episode, key, ext))
}

/// Rewrite a public storage URL into a proxied stream URL.
///
/// Without a proxy base the direct URL is returned unchanged.
pub fn stream_url(proxy_base: Option<&str>, direct_url: &str) -> String {
    match proxy_base.map(|b| b.trim_end_matches('/')) {
        Some(base) if !base.is_empty() => {
            format!("{}/proxy?url={}", base, urlencoding::encode(direct_url))
        }
        _ => direct_url.to_string(),
    }
}

impl crate::JobIdentity {
    /// Storage key for this identity.
    pub fn storage_key(&self, salt: &str) -> StorageKey {
        derive_key(
            salt,
            self.anime_id,
            self.episode,
            self.provider.as_str(),
            self.resolution.as_deref(),
        )
    }
}
