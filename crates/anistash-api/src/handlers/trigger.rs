//! Webhook fast path: hand one episode straight to the scheduler.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use anistash_models::{Job, Provider};
use anistash_worker::TriggerOutcome;

use crate::auth::verify_bearer;
use crate::error::{ApiError, ApiResult};
use crate::metrics::record_trigger;
use crate::state::AppState;

pub const MISSING_FIELDS: &str = "Missing required fields: mal_id, episode, provider, video_url";
pub const BAD_PROVIDER: &str = "provider must be 'animasu' or 'samehadaku'";

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TriggerResponse {
    Queued {
        queued: bool,
        mal_id: i64,
        episode: i32,
        provider: Provider,
    },
    Declined {
        queued: bool,
        reason: String,
    },
}

/// Validate a trigger body into a rowless job.
///
/// Zero ids and empty strings count as missing.
pub fn parse_trigger(body: &[u8]) -> ApiResult<Job> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| ApiError::bad_request("Invalid JSON body"))?;

    let mal_id = value.get("mal_id").and_then(Value::as_i64).filter(|v| *v != 0);
    let episode = value
        .get("episode")
        .and_then(Value::as_i64)
        .filter(|v| *v != 0)
        .and_then(|v| i32::try_from(v).ok());
    let provider = value
        .get("provider")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    let video_url = value
        .get("video_url")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());

    let (Some(mal_id), Some(episode), Some(provider), Some(video_url)) =
        (mal_id, episode, provider, video_url)
    else {
        return Err(ApiError::bad_request(MISSING_FIELDS));
    };

    let provider: Provider = provider
        .parse()
        .map_err(|_| ApiError::bad_request(BAD_PROVIDER))?;

    let mut job = Job::new(mal_id, episode, provider, video_url);
    if let Some(resolution) = value.get("resolution").and_then(Value::as_str) {
        job = job.with_resolution(resolution);
    }
    Ok(job)
}

pub async fn trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<TriggerResponse>> {
    if let Err(e) = verify_bearer(&headers, &state.config.trigger_secret) {
        record_trigger("unauthorized");
        return Err(e);
    }

    let job = parse_trigger(&body).inspect_err(|_| record_trigger("invalid"))?;
    info!(identity = %job.identity(), "Webhook trigger");

    let (mal_id, episode, provider) = (job.anime_id, job.episode, job.provider);
    match state.submitter.trigger(job).await {
        Ok(TriggerOutcome::Queued) => {
            record_trigger("queued");
            Ok(Json(TriggerResponse::Queued {
                queued: true,
                mal_id,
                episode,
                provider,
            }))
        }
        Ok(TriggerOutcome::Declined { reason }) => {
            record_trigger("declined");
            Ok(Json(TriggerResponse::Declined {
                queued: false,
                reason,
            }))
        }
        Err(e) => {
            warn!("Trigger rejected: {}", e);
            record_trigger("rejected");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_body() {
        let job = parse_trigger(
            br#"{"mal_id":55825,"episode":1,"provider":"animasu","video_url":"https://x/e.mp4","resolution":"720p"}"#,
        )
        .unwrap();
        assert_eq!(job.anime_id, 55825);
        assert_eq!(job.provider, Provider::Animasu);
        assert_eq!(job.resolution.as_deref(), Some("720p"));
        assert!(job.job_id.is_none());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        let err = parse_trigger(b"not json").unwrap_err();
        assert_eq!(err.to_string(), "Invalid JSON body");

        let err = parse_trigger(br#"{"mal_id":1,"episode":0,"provider":"animasu","video_url":"u"}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), MISSING_FIELDS);

        let err = parse_trigger(br#"{"mal_id":1,"episode":2,"provider":"crunchy","video_url":"u"}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), BAD_PROVIDER);
    }
}
