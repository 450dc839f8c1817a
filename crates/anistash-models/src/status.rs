//! Queue lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a row in the queue store.
///
/// Moves `pending -> downloading -> uploading -> ready | failed`. The only
/// backward move is stale recovery, which returns in-flight rows to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    #[default]
    Pending,
    Downloading,
    Uploading,
    Ready,
    Failed,
}

impl QueueStatus {
    pub const IN_FLIGHT: [QueueStatus; 2] = [QueueStatus::Downloading, QueueStatus::Uploading];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Downloading => "downloading",
            QueueStatus::Uploading => "uploading",
            QueueStatus::Ready => "ready",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Ready | QueueStatus::Failed)
    }

    /// Claimed by some worker and not yet finished.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, QueueStatus::Downloading | QueueStatus::Uploading)
    }

    /// Whether a trigger for this identity should be declined.
    pub fn blocks_trigger(&self) -> bool {
        self.is_in_flight() || *self == QueueStatus::Ready
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "downloading" => Ok(QueueStatus::Downloading),
            "uploading" => Ok(QueueStatus::Uploading),
            "ready" => Ok(QueueStatus::Ready),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(format!("unknown queue status '{}'", other)),
        }
    }
}
