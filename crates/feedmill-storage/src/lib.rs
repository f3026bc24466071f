//! SQLite-backed repositories for Feedmill
//!
//! One [`Store`] owns the pool; repository methods are grouped per
//! entity module. All upserts are idempotent so retried ingestion and
//! re-summarization never duplicate rows.

pub mod articles;
pub mod error;
pub mod store;
pub mod subscriptions;
pub mod summaries;
pub mod usage;

pub use articles::{Article, SaveOutcome};
pub use error::{Result, StorageError};
pub use store::Store;
pub use subscriptions::{SubscriptionRecord, UpsertStats};
pub use summaries::ArticleSummary;
pub use usage::DailyUsage;
