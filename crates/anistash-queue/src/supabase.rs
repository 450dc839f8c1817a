//! Supabase (PostgREST) queue and record store.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn, Instrument};

use anistash_models::{Job, JobId, JobIdentity, QueueStatus, StoredRecord};

use crate::error::{QueueError, QueueResult};
use crate::metrics::record_request;
use crate::retry::{with_retry, RetryConfig};
use crate::store::{IdentityStatus, QueueStats, QueueStore, RecordStore, StaleJob};

const QUEUE_TABLE: &str = "video_queue";
const STORE_TABLE: &str = "video_store";

/// Supabase connection configuration.
#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("service_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }

    pub fn from_env() -> QueueResult<Self> {
        let url = std::env::var("SUPABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| QueueError::config("SUPABASE_URL must be set"))?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| QueueError::config("SUPABASE_SERVICE_ROLE_KEY must be set"))?;

        let timeout_secs: u64 = std::env::var("SUPABASE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            timeout: Duration::from_secs(timeout_secs),
            retry: RetryConfig::from_env(),
            ..Self::new(url.trim(), service_key.trim())
        })
    }
}

#[derive(Debug, Deserialize)]
struct StatusRow {
    id: Value,
    status: String,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// PostgREST client for the queue and record tables.
#[derive(Clone)]
pub struct SupabaseStore {
    http: Client,
    config: SupabaseConfig,
}

impl SupabaseStore {
    pub fn new(config: SupabaseConfig) -> QueueResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("anistash-queue/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(SupabaseConfig::from_env()?)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/rest/v1/{}", self.config.url, path))
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
    }

    /// Send a request built by `build`, with retry, tracing and metrics.
    async fn execute<F>(&self, operation: &str, build: F) -> QueueResult<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let span = info_span!("queue_request", operation = %operation);
        let start = Instant::now();

        let result = with_retry(&self.config.retry, operation, || async {
            let response = build().send().await?;
            if response.status().is_success() {
                Ok(response)
            } else {
                Err(Self::handle_error_response(response).await)
            }
        })
        .instrument(span)
        .await;

        let status = match &result {
            Ok(response) => response.status().as_u16(),
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, start.elapsed().as_millis() as f64);

        result
    }

    async fn handle_error_response(response: reqwest::Response) -> QueueError {
        let status = response.status();
        let retry_after_ms = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let url = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        QueueError::from_http_status(
            status.as_u16(),
            format!("{} failed: {}", url, body),
            retry_after_ms,
        )
    }

    async fn rpc(&self, function: &str, params: Value) -> QueueResult<reqwest::Response> {
        let path = format!("rpc/{}", function);
        self.execute(function, || self.request(Method::POST, &path).json(&params))
            .await
    }

    fn identity_filters(identity: &JobIdentity) -> Vec<(&'static str, String)> {
        vec![
            ("mal_id", format!("eq.{}", identity.anime_id)),
            ("episode", format!("eq.{}", identity.episode)),
            ("provider", format!("eq.{}", identity.provider)),
            (
                "resolution",
                match &identity.resolution {
                    Some(res) => format!("eq.{}", res),
                    None => "is.null".to_string(),
                },
            ),
        ]
    }

    /// Parse one claimed row. Rows that cannot be parsed are failed in place.
    async fn parse_claimed(&self, mut row: Value) -> Option<Job> {
        if let Some(id) = row.get("id").filter(|v| v.is_number()).map(|v| v.to_string()) {
            row["id"] = Value::String(id);
        }

        match serde_json::from_value::<Job>(row.clone()) {
            Ok(job) => Some(job),
            Err(e) => {
                let id = row.get("id").and_then(Value::as_str).map(JobId::from_string);
                warn!(row_id = ?id, "Claimed row is not a valid job: {}", e);
                if let Some(id) = id {
                    let reason = format!("invalid job row: {}", e);
                    if let Err(err) = self.set_status(&id, QueueStatus::Failed, Some(&reason)).await {
                        warn!(job_id = %id, "Failed to mark invalid row: {}", err);
                    }
                }
                None
            }
        }
    }
}

fn value_to_id(value: &Value) -> Option<JobId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(JobId::from_string(s.clone())),
        Value::Number(n) => Some(JobId::from_string(n.to_string())),
        _ => None,
    }
}

fn parse_content_range_total(header: Option<&str>) -> Option<u64> {
    header?.rsplit('/').next()?.trim().parse().ok()
}

#[async_trait]
impl QueueStore for SupabaseStore {
    async fn claim_pending(&self, limit: u32) -> QueueResult<Vec<Job>> {
        let rows: Vec<Value> = self
            .rpc("claim_pending_videos", json!({ "p_limit": limit }))
            .await?
            .json::<Option<Vec<Value>>>()
            .await?
            .unwrap_or_default();

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(job) = self.parse_claimed(row).await {
                jobs.push(job);
            }
        }

        debug!(claimed = jobs.len(), "Claimed pending jobs");
        Ok(jobs)
    }

    async fn set_status(
        &self,
        job_id: &JobId,
        status: QueueStatus,
        error: Option<&str>,
    ) -> QueueResult<()> {
        self.rpc(
            "update_video_queue_status",
            json!({ "p_id": job_id.as_str(), "p_status": status.as_str(), "p_error": error }),
        )
        .await?;
        Ok(())
    }

    async fn get_status_by_identity(
        &self,
        identity: &JobIdentity,
    ) -> QueueResult<Option<IdentityStatus>> {
        let mut query = Self::identity_filters(identity);
        query.push(("select", "id,status".to_string()));
        query.push(("limit", "1".to_string()));

        let rows: Vec<StatusRow> = self
            .execute("get_status_by_identity", || {
                self.request(Method::GET, QUEUE_TABLE).query(&query)
            })
            .await?
            .json()
            .await?;

        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let job_id = value_to_id(&row.id)
            .ok_or_else(|| QueueError::invalid_row("queue row has no id"))?;
        let status = row
            .status
            .parse()
            .map_err(|e: String| QueueError::invalid_row(e))?;

        Ok(Some(IdentityStatus { job_id, status }))
    }

    async fn list_stale(
        &self,
        statuses: &[QueueStatus],
        older_than: DateTime<Utc>,
    ) -> QueueResult<Vec<StaleJob>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let status_list = statuses
            .iter()
            .map(QueueStatus::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let cutoff = older_than.to_rfc3339_opts(SecondsFormat::Secs, true);
        let query = [
            ("select", "id,status,updated_at".to_string()),
            ("status", format!("in.({})", status_list)),
            ("or", format!("(updated_at.lt.{},updated_at.is.null)", cutoff)),
        ];

        let rows: Vec<StatusRow> = self
            .execute("list_stale", || {
                self.request(Method::GET, QUEUE_TABLE).query(&query)
            })
            .await?
            .json()
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let job_id = value_to_id(&row.id)?;
                let status = row.status.parse().ok()?;
                Some(StaleJob {
                    job_id,
                    status,
                    updated_at: row.updated_at,
                })
            })
            .collect())
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        #[derive(Deserialize)]
        struct Row {
            status: Option<String>,
        }

        let rows: Vec<Row> = self
            .execute("queue_counts", || {
                self.request(Method::GET, QUEUE_TABLE)
                    .query(&[("select", "status")])
            })
            .await?
            .json()
            .await?;

        let mut by_status = BTreeMap::new();
        for row in rows {
            let key = row.status.unwrap_or_else(|| "unknown".to_string());
            *by_status.entry(key).or_insert(0u64) += 1;
        }

        let response = self
            .execute("archived_count", || {
                self.request(Method::GET, STORE_TABLE)
                    .query(&[("select", "id"), ("limit", "1")])
                    .header("Prefer", "count=exact")
            })
            .await?;
        let archived = parse_content_range_total(
            response
                .headers()
                .get("content-range")
                .and_then(|v| v.to_str().ok()),
        )
        .unwrap_or(0);

        Ok(QueueStats {
            by_status,
            archived,
        })
    }
}

#[async_trait]
impl RecordStore for SupabaseStore {
    async fn upsert_record(&self, record: &StoredRecord) -> QueueResult<()> {
        let response = self
            .rpc(
                "upsert_video_store",
                json!({
                    "p_mal_id": record.identity.anime_id,
                    "p_episode": record.identity.episode,
                    "p_provider": record.identity.provider.as_str(),
                    "p_resolution": record.identity.resolution,
                    "p_file_key": record.file_key.as_str(),
                    "p_hf_account": record.account_slot,
                    "p_hf_repo": record.repo_id,
                    "p_hf_path": record.path.as_str(),
                    "p_hf_direct_url": record.direct_url,
                    "p_stream_url": record.stream_url,
                }),
            )
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            debug!(identity = %record.identity, "Record upserted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anistash_models::{derive_key, derive_path, Provider};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> SupabaseStore {
        let mut config = SupabaseConfig::new(server.uri(), "service-key");
        config.retry = RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        SupabaseStore::new(config).unwrap()
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(parse_content_range_total(Some("0-0/42")), Some(42));
        assert_eq!(parse_content_range_total(Some("*/0")), Some(0));
        assert_eq!(parse_content_range_total(Some("0-0/*")), None);
        assert_eq!(parse_content_range_total(None), None);
    }

    #[tokio::test]
    async fn test_claim_pending_parses_rows_and_fails_bad_ones() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/claim_pending_videos"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .and(body_json(json!({ "p_limit": 5 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": "row-1", "mal_id": 21, "episode": 3, "provider": "animasu",
                    "video_url": "https://files.example/a.mp4", "resolution": "720p",
                    "status": "downloading"
                },
                {
                    "id": "row-2", "mal_id": 22, "episode": 1, "provider": "unknownsite",
                    "video_url": "https://files.example/b.mp4", "resolution": null
                }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/update_video_queue_status"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let jobs = store(&server).claim_pending(5).await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, Some(JobId::from_string("row-1")));
        assert_eq!(jobs[0].provider, Provider::Animasu);
        assert_eq!(jobs[0].resolution.as_deref(), Some("720p"));
    }

    #[tokio::test]
    async fn test_claim_pending_accepts_null_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/claim_pending_videos"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&server)
            .await;

        assert!(store(&server).claim_pending(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_status_sends_rpc() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/update_video_queue_status"))
            .and(body_json(json!({ "p_id": "row-1", "p_status": "failed", "p_error": "boom" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .set_status(&JobId::from_string("row-1"), QueueStatus::Failed, Some("boom"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_by_identity_uses_null_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/video_queue"))
            .and(query_param("mal_id", "eq.21"))
            .and(query_param("provider", "eq.samehadaku"))
            .and(query_param("resolution", "is.null"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{ "id": 77, "status": "uploading" }])),
            )
            .mount(&server)
            .await;

        let identity = JobIdentity::new(21, 1, Provider::Samehadaku);
        let found = store(&server)
            .get_status_by_identity(&identity)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found.job_id.as_str(), "77");
        assert_eq!(found.status, QueueStatus::Uploading);
    }

    #[tokio::test]
    async fn test_list_stale_filters() {
        let server = MockServer::start().await;
        let cutoff = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        Mock::given(method("GET"))
            .and(path("/rest/v1/video_queue"))
            .and(query_param("status", "in.(downloading,uploading)"))
            .and(query_param("or", "(updated_at.lt.2026-01-01T10:00:00Z,updated_at.is.null)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "a", "status": "downloading", "updated_at": "2026-01-01T07:00:00+00:00" },
                { "id": "b", "status": "uploading", "updated_at": null }
            ])))
            .mount(&server)
            .await;

        let stale = store(&server)
            .list_stale(&QueueStatus::IN_FLIGHT, cutoff)
            .await
            .unwrap();

        assert_eq!(stale.len(), 2);
        assert!(stale[0].updated_at.is_some());
        assert!(stale[1].updated_at.is_none());
    }

    #[tokio::test]
    async fn test_stats_counts_and_archived_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/video_queue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "status": "pending" }, { "status": "pending" }, { "status": "ready" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/video_store"))
            .and(header("prefer", "count=exact"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-range", "0-0/12")
                    .set_body_json(json!([{ "id": 1 }])),
            )
            .mount(&server)
            .await;

        let stats = store(&server).stats().await.unwrap();
        assert_eq!(stats.by_status.get("pending"), Some(&2));
        assert_eq!(stats.by_status.get("ready"), Some(&1));
        assert_eq!(stats.archived, 12);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/update_video_queue_status"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/update_video_queue_status"))
            .respond_with(ResponseTemplate::new(204))
            .with_priority(2)
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .set_status(&JobId::from_string("x"), QueueStatus::Ready, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_record_params() {
        let server = MockServer::start().await;
        let identity = JobIdentity::new(1, 1, Provider::Animasu).with_resolution("720p");
        let key = derive_key("s", 1, 1, "animasu", Some("720p"));
        let path_in_repo = derive_path(1, 1, &key, "mp4");

        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/upsert_video_store"))
            .and(body_json(json!({
                "p_mal_id": 1,
                "p_episode": 1,
                "p_provider": "animasu",
                "p_resolution": "720p",
                "p_file_key": key.as_str(),
                "p_hf_account": 2,
                "p_hf_repo": "u/weaboo-storage",
                "p_hf_path": path_in_repo.as_str(),
                "p_hf_direct_url": "https://hf/direct",
                "p_stream_url": "https://hf/direct",
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let record = StoredRecord {
            identity,
            file_key: key.clone(),
            account_slot: 2,
            repo_id: "u/weaboo-storage".into(),
            path: path_in_repo.clone(),
            direct_url: "https://hf/direct".into(),
            stream_url: "https://hf/direct".into(),
        };
        store(&server).upsert_record(&record).await.unwrap();
    }
}
