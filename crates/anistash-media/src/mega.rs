//! Mega.nz public-link downloads.
//!
//! A public link carries the node handle in its path and a 32-byte key in
//! its fragment. The content key is the XOR of the two key halves and the
//! counter block starts at `key[16..24]` followed by a zero 64-bit counter.
//! The CDN serves ciphertext, which is decrypted with AES-128-CTR while it
//! streams to disk.

use aes::Aes128;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::BytesMut;
use cipher::{KeyIvInit, StreamCipher};
use futures_util::StreamExt;
use regex::Regex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{ensure_non_empty, remove_partial};
use crate::BROWSER_USER_AGENT;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Default Mega API root.
pub const DEFAULT_MEGA_API: &str = "https://g.api.mega.co.nz";

/// API result codes that mean "try again later".
const RETRY_CODES: &[i64] = &[-3, -4];

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"mega(?:\.co)?\.nz/(?:embed|file)/([A-Za-z0-9_-]+)#?([A-Za-z0-9_=-]*)")
            .expect("valid mega link regex")
    })
}

/// Content key and initial counter block of a Mega file.
#[derive(Clone, PartialEq, Eq)]
pub struct MegaKey {
    aes_key: [u8; 16],
    iv: [u8; 16],
}

impl std::fmt::Debug for MegaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MegaKey(..)")
    }
}

impl MegaKey {
    /// Derive from the 32 raw bytes of a file key.
    pub fn from_raw(raw: &[u8; 32]) -> Self {
        let mut aes_key = [0u8; 16];
        for (i, byte) in aes_key.iter_mut().enumerate() {
            *byte = raw[i] ^ raw[i + 16];
        }

        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&raw[16..24]);

        Self { aes_key, iv }
    }

    /// Decode a link fragment (URL-safe base64, padding optional).
    pub fn from_fragment(fragment: &str) -> MediaResult<Self> {
        let trimmed = fragment.trim().trim_end_matches('=');
        if trimmed.is_empty() {
            return Err(MediaError::invalid_source("Mega link has no decryption key"));
        }

        let raw = URL_SAFE_NO_PAD
            .decode(trimmed)
            .map_err(|e| MediaError::invalid_source(format!("Mega key is not base64: {}", e)))?;

        let raw: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
            MediaError::invalid_source(format!("Mega key must be 32 bytes, got {}", raw.len()))
        })?;

        Ok(Self::from_raw(&raw))
    }

    pub fn aes_key(&self) -> &[u8; 16] {
        &self.aes_key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    fn cipher(&self) -> Aes128Ctr {
        Aes128Ctr::new(&self.aes_key.into(), &self.iv.into())
    }

    /// Decrypt a whole buffer from the start of the file.
    pub fn decrypt(&self, data: &mut [u8]) {
        self.cipher().apply_keystream(data);
    }
}

/// A parsed public file link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MegaLink {
    pub node_id: String,
    pub key: MegaKey,
}

impl MegaLink {
    pub fn parse(url: &str) -> MediaResult<Self> {
        let caps = link_regex()
            .captures(url)
            .ok_or_else(|| MediaError::invalid_source("Unrecognised Mega link"))?;

        let node_id = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if node_id.is_empty() {
            return Err(MediaError::invalid_source("Mega link has no node id"));
        }
        let fragment = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

        Ok(Self {
            node_id: node_id.to_string(),
            key: MegaKey::from_fragment(fragment)?,
        })
    }
}

/// Download location handed out by the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MegaFile {
    pub url: String,
    pub size: Option<u64>,
}

/// Mega client configuration.
#[derive(Debug, Clone)]
pub struct MegaConfig {
    pub api_base: String,
    /// Base delay for the `2^attempt` backoff.
    pub backoff_base: Duration,
    pub max_attempts: u32,
    /// Plaintext is written in blocks of this many bytes.
    pub chunk_size: usize,
    pub api_timeout: Duration,
    pub download_timeout: Duration,
}

impl Default for MegaConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_MEGA_API.to_string(),
            backoff_base: Duration::from_secs(1),
            max_attempts: 5,
            chunk_size: 1024 * 1024,
            api_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(3600),
        }
    }
}

/// Resolves and decrypts Mega public files.
#[derive(Clone)]
pub struct MegaClient {
    http: reqwest::Client,
    config: MegaConfig,
}

impl MegaClient {
    pub fn new(config: MegaConfig) -> MediaResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(BROWSER_USER_AGENT)
            .build()?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &MegaConfig {
        &self.config
    }

    /// Ask the API for the CDN location of `node_id`.
    pub async fn resolve(&self, node_id: &str) -> MediaResult<MegaFile> {
        let url = format!(
            "{}/cs?id={:08x}",
            self.config.api_base.trim_end_matches('/'),
            rand::random::<u32>()
        );
        let body = json!([{ "a": "g", "g": 1, "p": node_id }]);

        for attempt in 0..self.config.max_attempts {
            let response = self
                .http
                .post(&url)
                .timeout(self.config.api_timeout)
                .header("Origin", "https://mega.nz")
                .header("Referer", "https://mega.nz/")
                .json(&body)
                .send()
                .await?
                .error_for_status()?;

            let value: Value = response.json().await?;
            match parse_api_response(&value)? {
                ApiReply::File(file) => {
                    debug!(node = %node_id, size = ?file.size, "Mega node resolved");
                    return Ok(file);
                }
                ApiReply::Code(code) if RETRY_CODES.contains(&code) => {
                    let delay = self.config.backoff_base * 2u32.pow(attempt);
                    warn!(
                        node = %node_id,
                        code = code,
                        attempt = attempt + 1,
                        "Mega API asked to retry, backing off {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                ApiReply::Code(code) => return Err(MediaError::MegaApi { code }),
            }
        }

        Err(MediaError::RateLimited(format!(
            "Mega API still busy after {} attempts",
            self.config.max_attempts
        )))
    }

    /// Download and decrypt `url` into `output`.
    ///
    /// Partial output is removed on failure.
    pub async fn download(&self, url: &str, output: &Path) -> MediaResult<u64> {
        let link = MegaLink::parse(url)?;
        let result = self.download_link(&link, output).await;
        if result.is_err() {
            remove_partial(output).await;
        }
        result
    }

    async fn download_link(&self, link: &MegaLink, output: &Path) -> MediaResult<u64> {
        let file = self.resolve(&link.node_id).await?;
        info!(
            node = %link.node_id,
            size_mb = file.size.map(|s| s as f64 / (1024.0 * 1024.0)),
            "Mega download starting"
        );

        let response = self
            .http
            .get(&file.url)
            .timeout(self.config.download_timeout)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 509 || status.as_u16() == 429 {
            return Err(MediaError::RateLimited(format!("Mega CDN returned {}", status)));
        }
        if !status.is_success() {
            return Err(MediaError::download_failed(format!("Mega CDN returned {}", status)));
        }

        let mut out = File::create(output).await?;
        let mut cipher = link.key.cipher();
        let mut pending = BytesMut::with_capacity(self.config.chunk_size);
        let mut written = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(piece) = stream.next().await {
            pending.extend_from_slice(&piece?);

            while pending.len() >= self.config.chunk_size {
                let block = pending.split_to(self.config.chunk_size);
                let (next, plain) = decrypt_block(cipher, block).await?;
                cipher = next;
                out.write_all(&plain).await?;
                written += plain.len() as u64;
            }
        }

        if !pending.is_empty() {
            let (_, plain) = decrypt_block(cipher, pending).await?;
            out.write_all(&plain).await?;
            written += plain.len() as u64;
        }

        out.flush().await?;
        drop(out);

        if let Some(expected) = file.size {
            if expected != written {
                return Err(MediaError::download_failed(format!(
                    "Mega download truncated: {} of {} bytes",
                    written, expected
                )));
            }
        }

        let size = ensure_non_empty(output).await?;
        info!(
            node = %link.node_id,
            size_mb = size as f64 / (1024.0 * 1024.0),
            "Mega download complete"
        );
        Ok(size)
    }
}

/// Apply the keystream on the blocking pool, handing the cipher back.
async fn decrypt_block(mut cipher: Aes128Ctr, mut block: BytesMut) -> MediaResult<(Aes128Ctr, BytesMut)> {
    tokio::task::spawn_blocking(move || {
        cipher.apply_keystream(&mut block);
        (cipher, block)
    })
    .await
    .map_err(|e| MediaError::internal(format!("Decrypt task failed: {}", e)))
}

#[derive(Debug)]
enum ApiReply {
    File(MegaFile),
    Code(i64),
}

/// The API answers with a bare error code, a one-element array holding a
/// code, or a one-element array holding the file object.
fn parse_api_response(value: &Value) -> MediaResult<ApiReply> {
    let first = match value {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| MediaError::download_failed("Empty Mega API response"))?,
        other => other,
    };

    if let Some(code) = first.as_i64() {
        return Ok(ApiReply::Code(code));
    }

    let url = first
        .get("g")
        .and_then(Value::as_str)
        .filter(|g| !g.is_empty())
        .ok_or_else(|| MediaError::download_failed("Mega API response has no download URL"))?;

    Ok(ApiReply::File(MegaFile {
        url: url.to_string(),
        size: first.get("s").and_then(Value::as_u64),
    }))
}
