//! Queue statistics.

use axum::extract::State;
use axum::Json;
use tracing::warn;

use anistash_queue::QueueStats;

use crate::error::ApiResult;
use crate::state::AppState;

/// Row counts per status plus the number of stored records.
pub async fn queue_status(State(state): State<AppState>) -> ApiResult<Json<QueueStats>> {
    let stats = state.store.stats().await.map_err(|e| {
        warn!("Failed to load queue stats: {}", e);
        e
    })?;
    Ok(Json(stats))
}
