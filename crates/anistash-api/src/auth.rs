//! Bearer secret check for webhook routes.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use crate::error::ApiError;

pub const INVALID_SECRET: &str = "Invalid or missing webhook secret";

/// Accept the request when `secret` is empty or the header carries `Bearer <secret>`.
pub fn verify_bearer(headers: &HeaderMap, secret: &str) -> Result<(), ApiError> {
    if secret.is_empty() {
        return Ok(());
    }

    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => Ok(()),
        _ => Err(ApiError::unauthorized(INVALID_SECRET)),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
