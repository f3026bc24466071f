//! Subscription repository
//!
//! Rows mirror the remote subscription list and are refreshed on every
//! sync. The sync is best-effort: per-row failures are counted, and the
//! call succeeds if at least one row landed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;

use crate::error::Result;
use crate::store::Store;

/// A stored subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionRecord {
    /// Stream id, e.g. `feed/http://example.com/rss`
    pub id: String,
    pub stream_id: String,
    pub title: String,
    pub url: String,
    pub html_url: String,
    pub categories: Vec<String>,
}

/// Counters for one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub upserted: u64,
    pub failed: u64,
}

#[derive(FromRow)]
struct SubscriptionRow {
    id: String,
    stream_id: String,
    title: String,
    url: String,
    html_url: String,
    categories_json: String,
}

impl SubscriptionRow {
    fn into_record(self) -> SubscriptionRecord {
        let categories = serde_json::from_str(&self.categories_json).unwrap_or_default();
        SubscriptionRecord {
            id: self.id,
            stream_id: self.stream_id,
            title: self.title,
            url: self.url,
            html_url: self.html_url,
            categories,
        }
    }
}

impl Store {
    /// Upsert the full subscription set. Per-row failures are logged
    /// and counted rather than aborting the pass.
    pub async fn upsert_subscriptions(
        &self,
        records: &[SubscriptionRecord],
    ) -> Result<UpsertStats> {
        let now = Utc::now();
        let mut stats = UpsertStats::default();
        for record in records {
            match self.upsert_one(record, now).await {
                Ok(()) => stats.upserted += 1,
                Err(e) => {
                    warn!(subscription = %record.id, "subscription upsert failed: {e}");
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn upsert_one(&self, record: &SubscriptionRecord, now: DateTime<Utc>) -> Result<()> {
        let categories_json = serde_json::to_string(&record.categories)?;
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, stream_id, title, url, html_url, categories_json, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                stream_id = excluded.stream_id,
                title = excluded.title,
                url = excluded.url,
                html_url = excluded.html_url,
                categories_json = excluded.categories_json,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.stream_id)
        .bind(&record.title)
        .bind(&record.url)
        .bind(&record.html_url)
        .bind(categories_json)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All subscription ids in deterministic (lexicographic) order.
    pub async fn list_subscription_ids(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM subscriptions ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Full subscription rows, ordered by id.
    pub async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>> {
        let rows: Vec<SubscriptionRow> =
            sqlx::query_as("SELECT * FROM subscriptions ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(SubscriptionRow::into_record).collect())
    }

    /// One subscription by id.
    pub async fn fetch_subscription(&self, id: &str) -> Result<Option<SubscriptionRecord>> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(SubscriptionRow::into_record))
    }

    /// Number of tracked feeds.
    pub async fn feed_amount(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscriptions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
