// src/routes/health.rs
//! Liveness endpoint.
//!
//! Exports a subrouter with `/health` to the gateway. The handler does not
//! touch the store or the upstream source, so it answers as long as the
//! process is serving HTTP.

use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    success: bool,
    status: &'static str,
    timestamp: DateTime<Utc>,
}

/// Handle `GET /health`.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        status: "ok",
        timestamp: Utc::now(),
    })
}

/// Subrouter containing `/health`, generic over the gateway state.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
