//! Core orchestration engine for Feedmill
//!
//! Ties the remote API layer, storage and the summarizer together:
//! - [`rotation`] — the daily-resetting subscription cursor.
//! - [`scheduler`] — the two scheduling loops (subscription sync,
//!   article fetch) with rate-limit-aware exponential backoff.
//! - [`ingest`] — subscription sync and per-tick article fetching.
//! - [`summarize_service`] — article resolution and SSE fan-out.
//! - [`circuit`] — circuit breaker guarding downstream calls.
//! - [`urlfetch`] — bounded, SSRF-gated URL content fetching.

pub mod backoff;
pub mod circuit;
pub mod error;
pub mod ingest;
pub mod rotation;
pub mod scheduler;
pub mod summarize_service;
pub mod urlfetch;

pub use backoff::backoff_interval;
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState};
pub use error::{CoreError, Result};
pub use ingest::{FeedApi, IngestConfig, IngestService, RotationOutcome, SyncOutcome};
pub use rotation::{NextSubscription, RotationStats, RotatorConfig, SubscriptionRotator};
pub use scheduler::{
    JobKind, JobReport, JobStatus, ScheduleHandler, ScheduleStatus, SchedulerConfig,
};
pub use summarize_service::{
    ResolvedArticle, StreamResponseChunk, SummarizeConfig, SummarizeRequest, SummarizeService,
};
pub use urlfetch::UrlContentFetcher;
