//! HTTP front door for the acquisition worker.
//!
//! This crate provides:
//! - Liveness and queue statistics endpoints
//! - A bearer-protected trigger that feeds the embedded scheduler
//! - Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
