//! Source acquisition for episode files.
//!
//! This crate provides:
//! - Source classification and a dispatching [`SourceFetcher`]
//! - Multi-connection HTTP downloads through aria2c
//! - HLS stream-copy remuxing through FFmpeg with progress parsing
//! - Mega.nz link decryption (AES-128-CTR)
//! - Re-resolution of token-bound embed pages

pub mod command;
pub mod direct;
pub mod embed;
pub mod error;
pub mod fs_utils;
pub mod hls;
pub mod mega;
pub mod progress;
pub mod strategy;

pub use command::{check_aria2c, check_ffmpeg, FfmpegCommand, FfmpegOutcome, FfmpegRunner};
pub use direct::DirectDownloader;
pub use embed::{EmbedConfig, EmbedResolver};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{available_space, ensure_non_empty, remove_partial};
pub use hls::HlsMuxer;
pub use mega::{MegaClient, MegaConfig, MegaKey, MegaLink};
pub use progress::FfmpegProgress;
pub use strategy::{classify, FetcherConfig, MediaFetcher, SourceFetcher, SourceKind};

/// Desktop browser user agent presented to source hosts.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
