//! HLS stream-copy remuxing with FFmpeg.
//!
//! Segments of a token-bound playlist must all come from the same token.
//! FFmpeg's automatic reconnect is therefore disabled, and any segment the
//! demuxer had to skip turns the whole mux into a failure instead of a
//! silently truncated file.

use std::path::Path;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_non_empty;
use crate::BROWSER_USER_AGENT;

/// Sub-protocols an HLS input may open.
pub const HLS_PROTOCOL_WHITELIST: &str = "file,http,https,tcp,tls,crypto";

/// Default referer expected by the embed CDNs.
pub const DEFAULT_HLS_REFERER: &str = "https://callistanise.com/";

/// Stderr fragments that mean a segment was lost or mangled.
const SEGMENT_FAILURE_MARKERS: &[&str] = &[
    "Failed to open segment",
    "Failed to reload playlist",
    "Invalid data found when processing input",
    "Server returned 4",
    "Server returned 5",
    "HTTP error 4",
    "HTTP error 5",
    "error=-",
];

/// Remuxes an HLS playlist into a single mp4 without re-encoding.
#[derive(Debug, Clone)]
pub struct HlsMuxer {
    pub user_agent: String,
    pub referer: String,
    pub timeout_secs: u64,
}

impl Default for HlsMuxer {
    fn default() -> Self {
        Self {
            user_agent: BROWSER_USER_AGENT.to_string(),
            referer: DEFAULT_HLS_REFERER.to_string(),
            timeout_secs: 7200, // 2 hours
        }
    }
}

impl HlsMuxer {
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = referer.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Build the FFmpeg invocation for `url`.
    pub fn build_command(&self, url: &str, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(url, output)
            .log_level("warning")
            .user_agent(&self.user_agent)
            .headers(format!("Referer: {}\r\n", self.referer))
            .input_args(["-allowed_extensions", "ALL"])
            .input_args(["-protocol_whitelist", HLS_PROTOCOL_WHITELIST])
            .input_args(["-reconnect", "0"])
            .input_args(["-reconnect_streamed", "0"])
            .input_args(["-reconnect_on_network_error", "0"])
            .stream_copy()
            .audio_bitstream_filter("aac_adtstoasc")
    }

    /// Remux `url` into `output`.
    pub async fn mux(&self, url: &str, output: &Path) -> MediaResult<u64> {
        info!(output = %output.display(), "HLS remux: {}", truncate_url(url));

        let cmd = self.build_command(url, output);
        let runner = FfmpegRunner::new().with_timeout(self.timeout_secs);

        let outcome = runner
            .run_with_progress(&cmd, |progress| {
                debug!(
                    out_time = %progress.out_time,
                    size_mb = progress.size_mb(),
                    "HLS remux progress"
                );
            })
            .await?;

        if let Some(line) = find_segment_failure(&outcome.diagnostics) {
            return Err(MediaError::ffmpeg_failed(
                "HLS segment failed mid-stream",
                Some(line.to_string()),
                Some(0),
            ));
        }

        let size = ensure_non_empty(output).await?;
        info!(
            output = %output.display(),
            size_mb = size as f64 / (1024.0 * 1024.0),
            "HLS remux complete"
        );
        Ok(size)
    }
}

/// First stderr line reporting a lost or corrupt segment.
pub fn find_segment_failure(diagnostics: &[String]) -> Option<&str> {
    diagnostics
        .iter()
        .map(String::as_str)
        .find(|line| SEGMENT_FAILURE_MARKERS.iter().any(|m| line.contains(m)))
}

pub(crate) fn truncate_url(url: &str) -> &str {
    match url.char_indices().nth(80) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}
