//! Web API module for Feedmill
//!
//! REST + streaming endpoints:
//! - feed reads (stats, lists, search, unread counts, mark-as-read)
//! - streaming summarization (SSE)
//! - scheduler status and manual triggers
//! - quota status
//! - health

pub mod feeds;
pub mod health;
pub mod quota;
pub mod response;
pub mod scheduler;
pub mod summarize;

#[cfg(test)]
mod tests;

use axum::Router;

pub use feeds::feeds_routes;
pub use health::health_routes;
pub use quota::quota_routes;
pub use scheduler::scheduler_routes;
pub use summarize::summarize_routes;

/// Create the API router with all endpoints
pub fn api_router() -> Router {
    Router::new()
        .merge(health_routes())
        .merge(feeds_routes())
        .merge(summarize_routes())
        .merge(scheduler_routes())
        .merge(quota_routes())
}
