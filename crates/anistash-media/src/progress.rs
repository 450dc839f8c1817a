//! FFmpeg progress parsing.

/// Progress information from FFmpeg's `-progress` output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FfmpegProgress {
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Output time as string (HH:MM:SS.microseconds)
    pub out_time: String,
    /// Bytes written to the output so far
    pub total_size: u64,
    /// Muxing speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether muxing is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    pub fn size_mb(&self) -> f64 {
        self.total_size as f64 / (1024.0 * 1024.0)
    }
}

/// Fold one `key=value` line into `current`.
///
/// Returns a snapshot at every `progress=` marker, which ends a block.
pub(crate) fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let (key, value) = line.trim().split_once('=')?;

    match key {
        "out_time_ms" | "out_time_us" => {
            // Despite the name, out_time_ms is reported in microseconds too
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "out_time" => current.out_time = value.to_string(),
        "total_size" => {
            if let Ok(size) = value.parse() {
                current.total_size = size;
            }
        }
        "speed" => {
            if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            if value == "end" {
                current.is_complete = true;
            }
            return Some(current.clone());
        }
        _ => {}
    }

    None
}

/// Whether a stderr line belongs to the `-progress pipe:2` stream.
pub(crate) fn is_progress_line(line: &str) -> bool {
    match line.split_once('=') {
        Some((key, _)) => !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
        None => false,
    }
}
