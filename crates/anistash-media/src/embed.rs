//! Embed-page token re-resolution.
//!
//! CDN tokens found on embed pages are bound to the network origin that
//! requested the page. Before downloading, the page is fetched again from
//! this host, its packed player script is unpacked, and the master playlist
//! it references is narrowed to the first variant playlist.

use regex::{NoExpand, Regex, RegexBuilder};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{MediaError, MediaResult};
use crate::hls::truncate_url;
use crate::BROWSER_USER_AGENT;

/// Playlist keys in the player config, best quality first.
pub const QUALITY_KEYS: &[&str] = &["hls2", "hls4", "hls3"];

/// Default embed host substrings.
pub const DEFAULT_EMBED_HOSTS: &[&str] = &["vidhidepro", "vidhidefast", "callistanise"];

const PACKER_MARKER: &str = "eval(function";
const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn packer_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(
            r"eval\(function\(p,a,c,k,e,(?:d|r)\)\{.*?\}\('(.*?)',(\d+),(\d+),'(.*?)'\.split\('\|'\)\)",
        )
        .dot_matches_new_line(true)
        .build()
        .expect("valid packer regex")
    })
}

/// Arguments of a packed `eval(function(p,a,c,k,e,d){...})` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedScript {
    pub payload: String,
    pub radix: u32,
    pub count: usize,
    pub symbols: Vec<String>,
}

/// Locate the packed script in an embed page.
pub fn extract_packed(html: &str) -> Option<PackedScript> {
    if !html.contains(PACKER_MARKER) {
        return None;
    }

    let caps = packer_regex().captures(html)?;
    Some(PackedScript {
        payload: caps.get(1)?.as_str().to_string(),
        radix: caps.get(2)?.as_str().parse().ok()?,
        count: caps.get(3)?.as_str().parse().ok()?,
        symbols: caps.get(4)?.as_str().split('|').map(str::to_string).collect(),
    })
}

/// Render `num` in base `radix` with the packer's digit alphabet.
pub fn base_n(mut num: usize, radix: u32) -> String {
    let radix = radix.clamp(2, DIGITS.len() as u32) as usize;
    if num == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while num > 0 {
        out.push(DIGITS[num % radix]);
        num /= radix;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Substitute symbols back into the payload.
///
/// Indices run from the highest down so that a short token is never
/// replaced inside a longer one first. Empty symbols keep their token.
pub fn unpack(script: &PackedScript) -> MediaResult<String> {
    let mut text = script.payload.clone();

    for index in (0..script.count).rev() {
        let symbol = match script.symbols.get(index) {
            Some(s) if !s.is_empty() => s,
            _ => continue,
        };

        let token = base_n(index, script.radix);
        let re = Regex::new(&format!(r"\b{}\b", regex::escape(&token)))
            .map_err(|e| MediaError::internal(format!("Bad unpack token {}: {}", token, e)))?;
        text = re.replace_all(&text, NoExpand(symbol)).into_owned();
    }

    Ok(text)
}

/// First quality key present in unpacked player code, with its URL.
pub fn find_master_url(unpacked: &str) -> Option<(&'static str, String)> {
    QUALITY_KEYS.iter().find_map(|key| {
        let re = Regex::new(&format!(r#""{}"\s*:\s*"([^"]+)""#, key)).ok()?;
        let url = re.captures(unpacked)?.get(1)?.as_str().replace("\\/", "/");
        Some((*key, url))
    })
}

/// First variant playlist of a master playlist, absolutised against `base`.
pub fn first_variant(master: &str, base: &Url) -> Option<String> {
    let uri = match m3u8_rs::parse_playlist_res(master.as_bytes()) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(pl)) => pl
            .variants
            .into_iter()
            .find(|v| !v.is_i_frame)
            .map(|v| v.uri),
        Ok(m3u8_rs::Playlist::MediaPlaylist(_)) => None,
        Err(_) => scan_variant_lines(master),
    }?;

    let uri = uri.trim();
    if uri.is_empty() {
        return None;
    }
    if uri.starts_with("http") {
        return Some(uri.to_string());
    }
    base.join(uri).ok().map(String::from)
}

fn scan_variant_lines(master: &str) -> Option<String> {
    let mut lines = master.lines();
    while let Some(line) = lines.next() {
        if line.starts_with("#EXT-X-STREAM-INF") {
            let next = lines.next()?.trim();
            if !next.is_empty() && !next.starts_with('#') {
                return Some(next.to_string());
            }
        }
    }
    None
}

/// Re-resolver configuration.
#[derive(Debug, Clone)]
pub struct EmbedConfig {
    pub page_referer: String,
    pub accept_language: String,
    pub page_timeout: Duration,
    pub master_timeout: Duration,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            page_referer: "https://vidhidefast.com/".to_string(),
            accept_language: "id-ID,id;q=0.9,en-US;q=0.8".to_string(),
            page_timeout: Duration::from_secs(45),
            master_timeout: Duration::from_secs(15),
        }
    }
}

/// Mints a fresh HLS URL for an embed page.
#[derive(Clone)]
pub struct EmbedResolver {
    http: reqwest::Client,
    config: EmbedConfig,
}

impl EmbedResolver {
    pub fn new(config: EmbedConfig) -> MediaResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(BROWSER_USER_AGENT)
            .build()?;

        Ok(Self { http, config })
    }

    /// Resolve `embed_url` to a variant playlist URL.
    ///
    /// `Ok(None)` means the page no longer carries a usable stream.
    pub async fn resolve_fresh(&self, embed_url: &str) -> MediaResult<Option<String>> {
        info!("Re-resolving embed URL: {}", truncate_url(embed_url));

        let html = self
            .http
            .get(embed_url)
            .timeout(self.config.page_timeout)
            .header("Accept", "text/html,application/xhtml+xml,*/*;q=0.8")
            .header("Accept-Language", &self.config.accept_language)
            .header("Referer", &self.config.page_referer)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let Some(packed) = extract_packed(&html) else {
            warn!("Embed page has no packed player script");
            return Ok(None);
        };

        let unpacked = unpack(&packed)?;
        let Some((key, master_url)) = find_master_url(&unpacked) else {
            warn!("Unpacked player script has no playlist keys");
            return Ok(None);
        };
        debug!(quality = key, "Master playlist: {}", truncate_url(&master_url));

        let response = self
            .http
            .get(&master_url)
            .timeout(self.config.master_timeout)
            .send()
            .await?
            .error_for_status()?;
        let final_url = response.url().clone();
        let master = response.text().await?;

        match first_variant(&master, &final_url) {
            Some(url) => {
                info!(quality = key, "Fresh HLS URL: {}", truncate_url(&url));
                Ok(Some(url))
            }
            None => {
                warn!(quality = key, "Master playlist has no variant stream");
                Ok(None)
            }
        }
    }
}
