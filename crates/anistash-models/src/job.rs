//! Job definitions for queue processing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while interpreting job fields.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown provider '{0}', expected 'animasu' or 'samehadaku'")]
    UnknownProvider(String),
}

/// Queue row handle. Never used as the identity of the content itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source site the video link was scraped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Animasu,
    Samehadaku,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Animasu => "animasu",
            Provider::Samehadaku => "samehadaku",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "animasu" => Ok(Provider::Animasu),
            "samehadaku" => Ok(Provider::Samehadaku),
            other => Err(ModelError::UnknownProvider(other.to_string())),
        }
    }
}

/// External identity of a piece of content.
///
/// Deduplication, storage naming and the stored record are all keyed on
/// this tuple, never on the queue row id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIdentity {
    #[serde(rename = "mal_id")]
    pub anime_id: i64,
    pub episode: i32,
    pub provider: Provider,
    pub resolution: Option<String>,
}

impl JobIdentity {
    pub fn new(anime_id: i64, episode: i32, provider: Provider) -> Self {
        Self {
            anime_id,
            episode,
            provider,
            resolution: None,
        }
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    /// Process-local key used to detect the same content being worked twice.
    pub fn active_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.anime_id,
            self.episode,
            self.provider,
            self.resolution.as_deref().unwrap_or("unknown")
        )
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mal={} ep={} provider={} res={}",
            self.anime_id,
            self.episode,
            self.provider,
            self.resolution.as_deref().unwrap_or("unknown")
        )
    }
}

/// A unit of work: fetch one episode and replicate it to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Queue row id. Absent for fire-and-forget triggers with no row.
    #[serde(rename = "id", alias = "job_id", default)]
    pub job_id: Option<JobId>,
    #[serde(rename = "mal_id", alias = "anime_id")]
    pub anime_id: i64,
    pub episode: i32,
    pub provider: Provider,
    #[serde(rename = "video_url", alias = "source_url")]
    pub source_url: String,
    #[serde(default)]
    pub resolution: Option<String>,
}

impl Job {
    pub fn new(
        anime_id: i64,
        episode: i32,
        provider: Provider,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            job_id: None,
            anime_id,
            episode,
            provider,
            source_url: source_url.into(),
            resolution: None,
        }
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    pub fn identity(&self) -> JobIdentity {
        JobIdentity {
            anime_id: self.anime_id,
            episode: self.episode,
            provider: self.provider,
            resolution: self.resolution.clone(),
        }
    }

    /// Id used in log fields; jobs without a row are logged as `trigger`.
    pub fn log_id(&self) -> String {
        self.job_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "trigger".to_string())
    }
}
