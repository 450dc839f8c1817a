//! Source classification and dispatch.

use async_trait::async_trait;
use std::path::Path;
use tracing::{info, warn};
use url::Url;

use crate::direct::DirectDownloader;
use crate::embed::{EmbedConfig, EmbedResolver, DEFAULT_EMBED_HOSTS};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{ensure_non_empty, remove_partial};
use crate::hls::HlsMuxer;
use crate::mega::{MegaClient, MegaConfig};

/// How a source URL is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Mega,
    Embed,
    Hls,
    Direct,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Mega => "mega",
            SourceKind::Embed => "embed",
            SourceKind::Hls => "hls",
            SourceKind::Direct => "direct",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify `url`. The first matching rule wins.
pub fn classify(url: &str, embed_hosts: &[String]) -> SourceKind {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default();

    if host.contains("mega.nz") || host.contains("mega.co.nz") {
        SourceKind::Mega
    } else if !host.is_empty()
        && embed_hosts
            .iter()
            .any(|h| !h.is_empty() && host.contains(h.as_str()))
    {
        SourceKind::Embed
    } else if url.to_ascii_lowercase().contains("m3u8") {
        SourceKind::Hls
    } else {
        SourceKind::Direct
    }
}

/// Fetches a source URL into a local file.
///
/// On error the destination does not exist.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source_url: &str, destination: &Path) -> MediaResult<SourceKind>;
}

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Host substrings routed through the embed re-resolver.
    pub embed_hosts: Vec<String>,
    pub mega: MegaConfig,
    pub embed: EmbedConfig,
    pub hls: HlsMuxer,
    pub direct: DirectDownloader,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            embed_hosts: DEFAULT_EMBED_HOSTS.iter().map(|h| h.to_string()).collect(),
            mega: MegaConfig::default(),
            embed: EmbedConfig::default(),
            hls: HlsMuxer::default(),
            direct: DirectDownloader::default(),
        }
    }
}

impl FetcherConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(hosts) = std::env::var("EMBED_HOSTS") {
            let hosts: Vec<String> = hosts
                .split(',')
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect();
            if !hosts.is_empty() {
                config.embed_hosts = hosts;
            }
        }

        config
    }
}

/// Production fetcher dispatching over all strategies.
#[derive(Clone)]
pub struct MediaFetcher {
    embed_hosts: Vec<String>,
    mega: MegaClient,
    resolver: EmbedResolver,
    hls: HlsMuxer,
    direct: DirectDownloader,
}

impl MediaFetcher {
    pub fn new(config: FetcherConfig) -> MediaResult<Self> {
        Ok(Self {
            mega: MegaClient::new(config.mega)?,
            resolver: EmbedResolver::new(config.embed)?,
            embed_hosts: config.embed_hosts,
            hls: config.hls,
            direct: config.direct,
        })
    }

    pub fn classify(&self, url: &str) -> SourceKind {
        classify(url, &self.embed_hosts)
    }

    async fn dispatch(&self, kind: SourceKind, url: &str, destination: &Path) -> MediaResult<u64> {
        match kind {
            SourceKind::Mega => self.mega.download(url, destination).await,
            SourceKind::Embed => {
                // A stale token always fails downstream, so never fall back to the original URL
                let fresh = self.resolver.resolve_fresh(url).await?.ok_or_else(|| {
                    MediaError::resolve_failed("Embed page yielded no playable stream")
                })?;
                self.hls.mux(&fresh, destination).await
            }
            SourceKind::Hls => self.hls.mux(url, destination).await,
            SourceKind::Direct => self.direct.download(url, destination).await,
        }
    }
}

#[async_trait]
impl SourceFetcher for MediaFetcher {
    async fn fetch(&self, source_url: &str, destination: &Path) -> MediaResult<SourceKind> {
        Url::parse(source_url)
            .map_err(|e| MediaError::invalid_source(format!("Malformed source URL: {}", e)))?;

        let kind = self.classify(source_url);
        info!(strategy = %kind, destination = %destination.display(), "Fetching source");

        let result = match self.dispatch(kind, source_url, destination).await {
            Ok(_) => ensure_non_empty(destination).await.map(|_| kind),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            warn!(strategy = %kind, "Fetch failed: {}", e);
            remove_partial(destination).await;
        }
        result
    }
}
