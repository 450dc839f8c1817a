//! Multi-connection HTTP downloads via aria2c.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::command::check_aria2c;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_non_empty;
use crate::BROWSER_USER_AGENT;

/// Characters of stderr carried into a failure message.
const STDERR_TAIL_CHARS: usize = 500;

/// Byte-range parallel downloader.
#[derive(Debug, Clone)]
pub struct DirectDownloader {
    pub connections: u32,
    pub min_split_size: String,
    pub max_tries: u32,
    pub retry_wait_secs: u64,
    pub connect_timeout_secs: u64,
    pub io_timeout_secs: u64,
    pub overall_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for DirectDownloader {
    fn default() -> Self {
        Self {
            connections: 8,
            min_split_size: "1M".to_string(),
            max_tries: 3,
            retry_wait_secs: 2,
            connect_timeout_secs: 30,
            io_timeout_secs: 60,
            overall_timeout_secs: 3600,
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

impl DirectDownloader {
    /// aria2c arguments for fetching `url` into `output`.
    pub fn build_args(&self, url: &str, output: &Path) -> MediaResult<Vec<String>> {
        let dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = output
            .file_name()
            .ok_or_else(|| MediaError::internal(format!("No file name in {}", output.display())))?;

        Ok(vec![
            format!("--split={}", self.connections),
            format!("--max-connection-per-server={}", self.connections),
            format!("--min-split-size={}", self.min_split_size),
            format!("--max-tries={}", self.max_tries),
            format!("--retry-wait={}", self.retry_wait_secs),
            format!("--timeout={}", self.io_timeout_secs),
            format!("--connect-timeout={}", self.connect_timeout_secs),
            format!("--user-agent={}", self.user_agent),
            "--allow-overwrite=true".to_string(),
            "--auto-file-renaming=false".to_string(),
            "--console-log-level=warn".to_string(),
            "--summary-interval=0".to_string(),
            format!("--dir={}", dir.display()),
            format!("--out={}", file_name.to_string_lossy()),
            url.to_string(),
        ])
    }

    /// Download `url` to `output`, returning the file size.
    pub async fn download(&self, url: &str, output: &Path) -> MediaResult<u64> {
        check_aria2c()?;

        let args = self.build_args(url, output)?;
        info!(output = %output.display(), connections = self.connections, "Direct download starting");

        let child = Command::new("aria2c")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let result = tokio::time::timeout(
            Duration::from_secs(self.overall_timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| MediaError::Timeout(self.overall_timeout_secs))??;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            debug!("aria2c stderr: {}", stderr);
            return Err(MediaError::download_failed(format!(
                "aria2c exited with {}: {}",
                result.status,
                stderr_tail(&stderr)
            )));
        }

        let size = ensure_non_empty(output).await?;
        info!(
            output = %output.display(),
            size_mb = size as f64 / (1024.0 * 1024.0),
            "Direct download complete"
        );
        Ok(size)
    }
}

fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return trimmed;
    }
    match trimmed.char_indices().nth(count - STDERR_TAIL_CHARS) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args() {
        let args = DirectDownloader::default()
            .build_args("https://files.example/ep1.mp4", Path::new("/tmp/weaboo_x/ep1.mp4"))
            .unwrap();

        assert!(args.contains(&"--split=8".to_string()));
        assert!(args.contains(&"--max-connection-per-server=8".to_string()));
        assert!(args.contains(&"--min-split-size=1M".to_string()));
        assert!(args.contains(&"--max-tries=3".to_string()));
        assert!(args.contains(&"--retry-wait=2".to_string()));
        assert!(args.contains(&"--dir=/tmp/weaboo_x".to_string()));
        assert!(args.contains(&"--out=ep1.mp4".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-agent=Mozilla/5.0")));
        assert_eq!(args.last().unwrap(), "https://files.example/ep1.mp4");
    }

    #[test]
    fn test_relative_output_uses_current_dir() {
        let args = DirectDownloader::default()
            .build_args("https://x/y", Path::new("out.mp4"))
            .unwrap();
        assert!(args.contains(&"--dir=.".to_string()));
    }

    #[test]
    fn test_stderr_tail() {
        assert_eq!(stderr_tail("  short  "), "short");

        let long = format!("{}END", "x".repeat(1000));
        let tail = stderr_tail(&long);
        assert_eq!(tail.chars().count(), STDERR_TAIL_CHARS);
        assert!(tail.ends_with("END"));
    }
}
