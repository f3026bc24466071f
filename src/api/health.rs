//! Health check endpoint

use std::sync::Arc;

use axum::{extract::Extension, routing::get, Json, Router};
use serde::Serialize;

use crate::server::AppState;

/// Routes for health checks (no authentication).
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health))
}

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
}

async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "feedmill",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}
