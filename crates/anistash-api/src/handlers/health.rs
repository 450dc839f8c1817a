//! Liveness handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct RootResponse {
    pub name: &'static str,
    pub status: &'static str,
    pub worker_running: bool,
}

/// Root endpoint; doubles as the hosting platform's health probe.
pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        name: "anistash-worker",
        status: "ok",
        worker_running: state.submitter.is_running(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub worker_running: bool,
    pub storage_accounts: usize,
    pub cf_workers_configured: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        worker_running: state.submitter.is_running(),
        storage_accounts: state.storage_accounts,
        cf_workers_configured: state.cf_workers_configured,
    })
}
