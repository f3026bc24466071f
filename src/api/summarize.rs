//! Streaming summarization endpoint
//!
//! `POST /api/v1/summarize/stream` responds with an SSE body of
//! `StreamResponseChunk` JSON frames. The client token is canceled when
//! the response stream is dropped; the upstream generation itself lives
//! on a detached deadline inside the service, so a transient wobble in
//! delivery does not abort it.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::Extension,
    http::header,
    response::Response,
    routing::post,
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use feedmill_core::SummarizeRequest;

use crate::middleware::auth::RequireAuth;
use crate::server::AppState;

use super::response::ApiError;

/// Routes under `/api/v1/summarize`.
pub fn summarize_routes() -> Router {
    Router::new().route("/api/v1/summarize/stream", post(stream_summarize))
}

/// Request body for streaming summarization.
#[derive(Debug, serde::Deserialize, ToSchema)]
pub struct StreamSummarizeRequest {
    #[serde(default)]
    pub article_id: Option<String>,
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Stream a summary for an article (requires authentication)
#[utoipa::path(
    post,
    path = "/api/v1/summarize/stream",
    tag = "summarize",
    request_body = StreamSummarizeRequest,
    responses(
        (status = 200, description = "SSE stream of summary chunks", content_type = "text/event-stream"),
        (status = 400, description = "Neither article_id nor feed_url usable"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Unknown article id")
    ),
    security(("api_key" = []))
)]
pub async fn stream_summarize(
    RequireAuth(auth): RequireAuth,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<StreamSummarizeRequest>,
) -> Result<Response, ApiError> {
    let client_token = CancellationToken::new();

    let chunks = state
        .summarizer
        .stream(
            SummarizeRequest {
                article_id: request.article_id,
                feed_url: request.feed_url,
                content: request.content,
                title: request.title,
            },
            auth.user_id,
            client_token.clone(),
        )
        .await?;

    // Dropping the response body (client gone) drops the guard, which
    // cancels the client token and lets the service reap the upstream.
    let guard = client_token.drop_guard();
    let stream = futures_util::stream::unfold(
        (chunks, guard),
        |(mut chunks, guard)| async move {
            let chunk = chunks.recv().await?;
            let payload =
                serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
            Some((
                Ok::<_, Infallible>(format!("data: {payload}\n\n")),
                (chunks, guard),
            ))
        },
    );

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::from(feedmill_core::CoreError::Internal(e.to_string())))
}
