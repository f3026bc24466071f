//! Scheduler status and manual trigger endpoints

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;

use feedmill_core::{JobStatus, RotationStats};

use crate::middleware::auth::RequireAuth;
use crate::server::AppState;

use super::response::{ApiError, ApiResponse};

/// Routes under `/api/v1/scheduler`.
pub fn scheduler_routes() -> Router {
    Router::new()
        .route("/api/v1/scheduler/status", get(scheduler_status))
        .route("/api/v1/scheduler/sync/trigger", post(trigger_sync))
        .route("/api/v1/scheduler/fetch/trigger", post(trigger_fetch))
}

/// One scheduling loop in the status payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct JobStatusView {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub canceled_count: u64,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<String>,
}

impl From<JobStatus> for JobStatusView {
    fn from(status: JobStatus) -> Self {
        Self {
            running: status.running,
            last_run_at: status.last_run_at.map(|t| t.to_rfc3339()),
            next_run_at: status.next_run_at.map(|t| t.to_rfc3339()),
            run_count: status.run_count,
            success_count: status.success_count,
            failure_count: status.failure_count,
            canceled_count: status.canceled_count,
            consecutive_failures: status.consecutive_failures,
            last_error: status.last_error,
            last_result: status.last_result,
        }
    }
}

/// Rotation progress in the status payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct RotationStatsView {
    pub total_subscriptions: usize,
    pub processed_today: usize,
    pub remaining_today: usize,
    pub current_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_processing_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion_time: Option<String>,
}

impl RotationStatsView {
    fn new(stats: RotationStats, blocked: bool) -> Self {
        Self {
            total_subscriptions: stats.total_subscriptions,
            processed_today: stats.processed_today,
            remaining_today: stats.remaining_today,
            current_index: stats.current_index,
            // Scheduling estimates are meaningless while quota-blocked.
            next_processing_time: (!blocked)
                .then_some(stats.next_processing_time)
                .flatten()
                .map(|t| t.to_rfc3339()),
            estimated_completion_time: (!blocked)
                .then_some(stats.estimated_completion_time)
                .flatten()
                .map(|t| t.to_rfc3339()),
        }
    }
}

/// Full scheduler status payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct SchedulerStatusView {
    pub subscription_sync: JobStatusView,
    pub article_fetch: JobStatusView,
    pub rotation: RotationStatsView,
    pub quota_blocked: bool,
}

/// Trigger acknowledgment.
#[derive(Debug, Serialize, ToSchema)]
pub struct TriggerView {
    pub triggered: bool,
}

/// Scheduler status snapshot (requires authentication)
#[utoipa::path(
    get,
    path = "/api/v1/scheduler/status",
    tag = "scheduler",
    responses(
        (status = 200, description = "Status of both loops", body = SchedulerStatusView),
        (status = 401, description = "Unauthorized")
    ),
    security(("api_key" = []))
)]
pub async fn scheduler_status(
    RequireAuth(_auth): RequireAuth,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ApiResponse<SchedulerStatusView>>, ApiError> {
    let status = state.scheduler.status().await;
    let rotation = state.rotator.stats().await;
    let blocked = state.quota.is_blocked().await;

    Ok(Json(ApiResponse::success(SchedulerStatusView {
        subscription_sync: status.subscription_sync.into(),
        article_fetch: status.article_fetch.into(),
        rotation: RotationStatsView::new(rotation, blocked),
        quota_blocked: blocked,
    })))
}

/// Trigger a subscription sync now (requires authentication)
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/sync/trigger",
    tag = "scheduler",
    responses(
        (status = 200, description = "Whether the sync was started", body = TriggerView),
        (status = 401, description = "Unauthorized")
    ),
    security(("api_key" = []))
)]
pub async fn trigger_sync(
    RequireAuth(_auth): RequireAuth,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ApiResponse<TriggerView>>, ApiError> {
    let triggered = state.scheduler.trigger_sync().await;
    Ok(Json(ApiResponse::success(TriggerView { triggered })))
}

/// Trigger a rotation tick now (requires authentication)
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/fetch/trigger",
    tag = "scheduler",
    responses(
        (status = 200, description = "Whether the tick was started", body = TriggerView),
        (status = 401, description = "Unauthorized")
    ),
    security(("api_key" = []))
)]
pub async fn trigger_fetch(
    RequireAuth(_auth): RequireAuth,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ApiResponse<TriggerView>>, ApiError> {
    let triggered = state.scheduler.trigger_fetch().await;
    Ok(Json(ApiResponse::success(TriggerView { triggered })))
}
