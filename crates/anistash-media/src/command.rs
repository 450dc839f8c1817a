//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{is_progress_line, parse_progress_line, FfmpegProgress};

/// Number of diagnostic stderr lines kept for error reporting.
const DIAGNOSTIC_TAIL: usize = 40;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input URL or path
    input: String,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl Into<String>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.into(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the HTTP user agent for network inputs.
    pub fn user_agent(self, user_agent: impl Into<String>) -> Self {
        self.input_arg("-user_agent").input_arg(user_agent)
    }

    /// Set extra HTTP headers for network inputs. Each header must end in CRLF.
    pub fn headers(self, headers: impl Into<String>) -> Self {
        self.input_arg("-headers").input_arg(headers)
    }

    /// Copy all streams without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Set the audio bitstream filter.
    pub fn audio_bitstream_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-bsf:a").output_arg(filter)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.clone());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// What a finished FFmpeg run left behind on stderr.
#[derive(Debug, Clone, Default)]
pub struct FfmpegOutcome {
    /// Trailing non-progress stderr lines
    pub diagnostics: Vec<String>,
    /// Last progress block reported
    pub last_progress: Option<FfmpegProgress>,
}

/// Runner for FFmpeg commands with progress tracking and a timeout.
pub struct FfmpegRunner {
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self { timeout_secs: None }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<FfmpegOutcome> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<FfmpegOutcome>
    where
        F: Fn(&FfmpegProgress) + Send + 'static,
    {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;
        let mut reader = BufReader::new(stderr).lines();

        // Progress blocks and diagnostics share stderr
        let stderr_handle = tokio::spawn(async move {
            let mut current = FfmpegProgress::default();
            let mut outcome = FfmpegOutcome::default();
            let mut tail = VecDeque::with_capacity(DIAGNOSTIC_TAIL);

            while let Ok(Some(line)) = reader.next_line().await {
                if is_progress_line(&line) {
                    if let Some(progress) = parse_progress_line(&line, &mut current) {
                        progress_callback(&progress);
                        outcome.last_progress = Some(progress);
                    }
                } else if !line.trim().is_empty() {
                    if tail.len() == DIAGNOSTIC_TAIL {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }

            outcome.diagnostics = tail.into_iter().collect();
            outcome
        });

        let result = self.wait_for_completion(&mut child).await;

        let outcome = stderr_handle.await.unwrap_or_default();

        match result {
            Ok(()) => Ok(outcome),
            Err(MediaError::FfmpegFailed {
                message, exit_code, ..
            }) => Err(MediaError::ffmpeg_failed(
                message,
                Some(outcome.diagnostics.join("\n")),
                exit_code,
            )),
            Err(e) => Err(e),
        }
    }

    /// Wait for the child process, killing it at the timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<()> {
        let deadline = async {
            match self.timeout_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = deadline => Waited::TimedOut,
        };

        let status = match waited {
            Waited::Exited(status) => status?,
            Waited::TimedOut => {
                let secs = self.timeout_secs.unwrap_or_default();
                warn!("FFmpeg timed out after {} seconds, killing process", secs);
                let _ = child.kill().await;
                return Err(MediaError::Timeout(secs));
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                None,
                status.code(),
            ))
        }
    }
}

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if aria2c is available.
pub fn check_aria2c() -> MediaResult<PathBuf> {
    which::which("aria2c").map_err(|_| MediaError::Aria2cNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder_orders_input_and_output_args() {
        let cmd = FfmpegCommand::new("https://cdn.example/index.m3u8", "out.mp4")
            .user_agent("UA")
            .headers("Referer: https://example.com/\r\n")
            .stream_copy()
            .audio_bitstream_filter("aac_adtstoasc");

        let args = cmd.build_args();
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        let ua_pos = args.iter().position(|a| a == "-user_agent").unwrap();
        let copy_pos = args.iter().position(|a| a == "-c").unwrap();

        assert_eq!(args[0], "-y");
        assert!(ua_pos < input_pos);
        assert!(copy_pos > input_pos);
        assert_eq!(args[input_pos + 1], "https://cdn.example/index.m3u8");
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_log_level_is_configurable() {
        let args = FfmpegCommand::new("in", "out.mp4").log_level("warning").build_args();
        let v = args.iter().position(|a| a == "-v").unwrap();
        assert_eq!(args[v + 1], "warning");
    }
}
