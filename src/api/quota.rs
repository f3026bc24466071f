//! Quota status endpoint
//!
//! GET /api/v1/quota — daily Zone 1 / Zone 2 usage and blocked state.

use std::sync::Arc;

use axum::{extract::Extension, routing::get, Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::middleware::auth::RequireAuth;
use crate::server::AppState;

use super::response::{ApiError, ApiResponse};

/// Routes under `/api/v1/quota`.
pub fn quota_routes() -> Router {
    Router::new().route("/api/v1/quota", get(get_quota))
}

/// One zone's counters.
#[derive(Debug, Serialize, ToSchema)]
pub struct ZoneQuotaView {
    pub used: u64,
    pub limit: u64,
    pub effective_limit: u64,
    pub usage_pct: f64,
}

/// Quota status payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuotaView {
    pub day: String,
    pub zone1: ZoneQuotaView,
    pub zone2: ZoneQuotaView,
    pub blocked: bool,
}

/// Current quota usage (requires authentication)
#[utoipa::path(
    get,
    path = "/api/v1/quota",
    tag = "quota",
    responses(
        (status = 200, description = "Daily usage per zone", body = QuotaView),
        (status = 401, description = "Unauthorized")
    ),
    security(("api_key" = []))
)]
pub async fn get_quota(
    RequireAuth(_auth): RequireAuth,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ApiResponse<QuotaView>>, ApiError> {
    let snapshot = state.quota.snapshot().await;
    Ok(Json(ApiResponse::success(QuotaView {
        day: snapshot.counters.day_key.to_string(),
        zone1: ZoneQuotaView {
            used: snapshot.counters.zone1_used,
            limit: snapshot.counters.zone1_limit,
            effective_limit: snapshot.zone1_effective_limit,
            usage_pct: snapshot.zone1_usage_pct,
        },
        zone2: ZoneQuotaView {
            used: snapshot.counters.zone2_used,
            limit: snapshot.counters.zone2_limit,
            effective_limit: snapshot.zone2_effective_limit,
            usage_pct: snapshot.zone2_usage_pct,
        },
        blocked: snapshot.blocked,
    })))
}
