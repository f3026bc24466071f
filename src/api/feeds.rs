//! Feed read API
//!
//! Cursor-paginated article listing plus stats, search, unread counts
//! and per-user mark-as-read. All routes require an authenticated
//! caller.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use feedmill_storage::Article;

use crate::middleware::auth::RequireAuth;
use crate::server::AppState;

use super::response::{ApiError, ApiResponse};

const DEFAULT_PAGE_LIMIT: i64 = 20;
const MAX_PAGE_LIMIT: i64 = 100;

/// Routes under `/api/v1/feeds`.
pub fn feeds_routes() -> Router {
    Router::new()
        .route("/api/v1/feeds", get(list_feeds))
        .route("/api/v1/feeds/unread", get(list_unread_feeds))
        .route("/api/v1/feeds/viewed", get(list_read_feeds))
        .route("/api/v1/feeds/stats", get(feed_stats))
        .route("/api/v1/feeds/stats/detailed", get(detailed_feed_stats))
        .route("/api/v1/feeds/unread/count", get(unread_count))
        .route("/api/v1/feeds/search", get(search_feeds))
        .route("/api/v1/feeds/read", post(mark_as_read))
}

/// One article in list responses.
#[derive(Debug, Serialize, ToSchema)]
pub struct FeedItemView {
    pub id: String,
    pub title: String,
    pub url: String,
    pub created_at: String,
}

impl From<Article> for FeedItemView {
    fn from(article: Article) -> Self {
        Self {
            id: article.id,
            title: article.title,
            url: article.url,
            created_at: article.created_at.to_rfc3339(),
        }
    }
}

/// Cursor-paginated page.
#[derive(Debug, Serialize, ToSchema)]
pub struct FeedPage {
    pub data: Vec<FeedItemView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

/// List articles, newest first (requires authentication)
#[utoipa::path(
    get,
    path = "/api/v1/feeds",
    tag = "feeds",
    responses(
        (status = 200, description = "One page of articles", body = FeedPage),
        (status = 400, description = "Malformed cursor"),
        (status = 401, description = "Unauthorized")
    ),
    security(("api_key" = []))
)]
pub async fn list_feeds(
    RequireAuth(_auth): RequireAuth,
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<FeedPage>>, ApiError> {
    let limit = clamp_limit(query.limit);
    let cursor = parse_cursor(query.cursor.as_deref())?;

    let articles = state.store.list_articles(cursor, limit).await?;
    Ok(Json(ApiResponse::success(page_from(articles, limit))))
}

/// `has_more` holds exactly when the page came back full; the cursor is
/// the timestamp of the last returned item.
fn page_from(articles: Vec<Article>, limit: i64) -> FeedPage {
    let has_more = articles.len() as i64 == limit;
    let next_cursor = if has_more {
        articles.last().map(|a| a.created_at.to_rfc3339())
    } else {
        None
    };
    FeedPage {
        data: articles.into_iter().map(FeedItemView::from).collect(),
        next_cursor,
        has_more,
    }
}

/// Unread articles for the caller, newest first (requires authentication)
#[utoipa::path(
    get,
    path = "/api/v1/feeds/unread",
    tag = "feeds",
    responses(
        (status = 200, description = "One page of unread articles", body = FeedPage),
        (status = 400, description = "Malformed cursor"),
        (status = 401, description = "Unauthorized")
    ),
    security(("api_key" = []))
)]
pub async fn list_unread_feeds(
    RequireAuth(auth): RequireAuth,
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<FeedPage>>, ApiError> {
    let limit = clamp_limit(query.limit);
    let cursor = parse_cursor(query.cursor.as_deref())?;
    let articles = state
        .store
        .list_unread_articles(&auth.user_id, cursor, limit)
        .await?;
    Ok(Json(ApiResponse::success(page_from(articles, limit))))
}

/// Read articles for the caller, newest first (requires authentication)
#[utoipa::path(
    get,
    path = "/api/v1/feeds/viewed",
    tag = "feeds",
    responses(
        (status = 200, description = "One page of read articles", body = FeedPage),
        (status = 400, description = "Malformed cursor"),
        (status = 401, description = "Unauthorized")
    ),
    security(("api_key" = []))
)]
pub async fn list_read_feeds(
    RequireAuth(auth): RequireAuth,
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<FeedPage>>, ApiError> {
    let limit = clamp_limit(query.limit);
    let cursor = parse_cursor(query.cursor.as_deref())?;
    let articles = state
        .store
        .list_read_articles(&auth.user_id, cursor, limit)
        .await?;
    Ok(Json(ApiResponse::success(page_from(articles, limit))))
}

/// Aggregate feed counters.
#[derive(Debug, Serialize, ToSchema)]
pub struct FeedStatsView {
    pub feed_amount: i64,
    pub total_articles: i64,
    pub summarized_articles: i64,
}

/// Basic feed statistics (requires authentication)
#[utoipa::path(
    get,
    path = "/api/v1/feeds/stats",
    tag = "feeds",
    responses(
        (status = 200, description = "Aggregate counters", body = FeedStatsView),
        (status = 401, description = "Unauthorized")
    ),
    security(("api_key" = []))
)]
pub async fn feed_stats(
    RequireAuth(_auth): RequireAuth,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ApiResponse<FeedStatsView>>, ApiError> {
    Ok(Json(ApiResponse::success(FeedStatsView {
        feed_amount: state.store.feed_amount().await?,
        total_articles: state.store.total_articles().await?,
        summarized_articles: state.store.summarized_articles_count().await?,
    })))
}

/// Extended counters including per-user unread totals.
#[derive(Debug, Serialize, ToSchema)]
pub struct DetailedFeedStatsView {
    pub feed_amount: i64,
    pub total_articles: i64,
    pub summarized_articles: i64,
    pub unsummarized_articles: i64,
    pub today_unread_articles: i64,
}

/// Detailed feed statistics (requires authentication)
#[utoipa::path(
    get,
    path = "/api/v1/feeds/stats/detailed",
    tag = "feeds",
    responses(
        (status = 200, description = "Extended counters", body = DetailedFeedStatsView),
        (status = 401, description = "Unauthorized")
    ),
    security(("api_key" = []))
)]
pub async fn detailed_feed_stats(
    RequireAuth(auth): RequireAuth,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ApiResponse<DetailedFeedStatsView>>, ApiError> {
    let since = start_of_local_day();
    Ok(Json(ApiResponse::success(DetailedFeedStatsView {
        feed_amount: state.store.feed_amount().await?,
        total_articles: state.store.total_articles().await?,
        summarized_articles: state.store.summarized_articles_count().await?,
        unsummarized_articles: state.store.unsummarized_articles_count().await?,
        today_unread_articles: state
            .store
            .today_unread_articles_count(&auth.user_id, since)
            .await?,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UnreadQuery {
    /// RFC3339 lower bound; defaults to local midnight
    pub since: Option<String>,
}

/// Unread count response.
#[derive(Debug, Serialize, ToSchema)]
pub struct UnreadCountView {
    pub count: i64,
    pub since: String,
}

/// Today's unread article count for the caller (requires authentication)
#[utoipa::path(
    get,
    path = "/api/v1/feeds/unread/count",
    tag = "feeds",
    responses(
        (status = 200, description = "Unread count", body = UnreadCountView),
        (status = 400, description = "Malformed since timestamp"),
        (status = 401, description = "Unauthorized")
    ),
    security(("api_key" = []))
)]
pub async fn unread_count(
    RequireAuth(auth): RequireAuth,
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<UnreadQuery>,
) -> Result<Json<ApiResponse<UnreadCountView>>, ApiError> {
    let since = match query.since.as_deref() {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|e| ApiError::invalid_argument(format!("invalid since timestamp: {e}")))?
            .with_timezone(&Utc),
        None => start_of_local_day(),
    };

    let count = state
        .store
        .today_unread_articles_count(&auth.user_id, since)
        .await?;
    Ok(Json(ApiResponse::success(UnreadCountView {
        count,
        since: since.to_rfc3339(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
}

/// Title search (requires authentication)
#[utoipa::path(
    get,
    path = "/api/v1/feeds/search",
    tag = "feeds",
    responses(
        (status = 200, description = "Matching articles", body = [FeedItemView]),
        (status = 400, description = "Missing query"),
        (status = 401, description = "Unauthorized")
    ),
    security(("api_key" = []))
)]
pub async fn search_feeds(
    RequireAuth(_auth): RequireAuth,
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ApiResponse<Vec<FeedItemView>>>, ApiError> {
    let needle = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::invalid_argument("q is required"))?;

    let limit = clamp_limit(query.limit);
    let hits = state.store.search_articles(needle, limit).await?;
    Ok(Json(ApiResponse::success(
        hits.into_iter().map(FeedItemView::from).collect(),
    )))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MarkAsReadRequest {
    pub feed_url: String,
}

/// Mark-as-read acknowledgment.
#[derive(Debug, Serialize, ToSchema)]
pub struct MarkAsReadView {
    pub feed_url: String,
    pub read: bool,
}

/// Mark an article read for the caller (requires authentication)
#[utoipa::path(
    post,
    path = "/api/v1/feeds/read",
    tag = "feeds",
    request_body = MarkAsReadRequest,
    responses(
        (status = 200, description = "Marked read", body = MarkAsReadView),
        (status = 400, description = "Missing URL"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Unknown article URL")
    ),
    security(("api_key" = []))
)]
pub async fn mark_as_read(
    RequireAuth(auth): RequireAuth,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<MarkAsReadRequest>,
) -> Result<Json<ApiResponse<MarkAsReadView>>, ApiError> {
    let url = request.feed_url.trim();
    if url.is_empty() {
        return Err(ApiError::invalid_argument("feed_url is required"));
    }

    state.store.mark_article_read(&auth.user_id, url).await?;
    Ok(Json(ApiResponse::success(MarkAsReadView {
        feed_url: url.to_string(),
        read: true,
    })))
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(l) if l <= 0 => DEFAULT_PAGE_LIMIT,
        Some(l) if l > MAX_PAGE_LIMIT => MAX_PAGE_LIMIT,
        Some(l) => l,
        None => DEFAULT_PAGE_LIMIT,
    }
}

fn parse_cursor(cursor: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match cursor.map(str::trim).filter(|c| !c.is_empty()) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| ApiError::invalid_argument(format!("invalid cursor: {e}"))),
    }
}

fn start_of_local_day() -> DateTime<Utc> {
    let midnight = Local::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default();
    midnight
        .and_local_timezone(Local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit_defaults_and_caps() {
        assert_eq!(clamp_limit(None), 20);
        assert_eq!(clamp_limit(Some(0)), 20);
        assert_eq!(clamp_limit(Some(-5)), 20);
        assert_eq!(clamp_limit(Some(50)), 50);
        assert_eq!(clamp_limit(Some(100)), 100);
        assert_eq!(clamp_limit(Some(101)), 100);
        assert_eq!(clamp_limit(Some(100_000)), 100);
    }

    #[test]
    fn test_parse_cursor() {
        assert_eq!(parse_cursor(None).unwrap(), None);
        assert_eq!(parse_cursor(Some("")).unwrap(), None);
        assert!(parse_cursor(Some("2026-08-01T10:00:00Z")).unwrap().is_some());
        assert!(parse_cursor(Some("yesterday")).is_err());
    }

    #[test]
    fn test_start_of_local_day_is_in_the_past() {
        let start = start_of_local_day();
        assert!(start <= Utc::now());
        assert!(Utc::now() - start <= chrono::Duration::hours(25));
    }
}
