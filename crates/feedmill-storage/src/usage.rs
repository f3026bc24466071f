//! Daily API usage counters
//!
//! One row per local calendar day, upserted by the rate-limit manager
//! after every header update.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

use crate::error::Result;
use crate::store::Store;

/// Persisted counters for one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyUsage {
    pub day_key: NaiveDate,
    pub zone1_used: i64,
    pub zone1_limit: i64,
    pub zone2_used: i64,
    pub zone2_limit: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct UsageRow {
    day_key: String,
    zone1_used: i64,
    zone1_limit: i64,
    zone2_used: i64,
    zone2_limit: i64,
    updated_at: DateTime<Utc>,
}

impl Store {
    /// Upsert the counters for a day.
    pub async fn record_daily_usage(
        &self,
        day_key: NaiveDate,
        zone1_used: i64,
        zone1_limit: i64,
        zone2_used: i64,
        zone2_limit: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_usage_tracking
                (day_key, zone1_used, zone1_limit, zone2_used, zone2_limit, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(day_key) DO UPDATE SET
                zone1_used = excluded.zone1_used,
                zone1_limit = excluded.zone1_limit,
                zone2_used = excluded.zone2_used,
                zone2_limit = excluded.zone2_limit,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(day_key.to_string())
        .bind(zone1_used)
        .bind(zone1_limit)
        .bind(zone2_used)
        .bind(zone2_limit)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Counters for a day, if tracked.
    pub async fn fetch_daily_usage(&self, day_key: NaiveDate) -> Result<Option<DailyUsage>> {
        let row: Option<UsageRow> =
            sqlx::query_as("SELECT * FROM api_usage_tracking WHERE day_key = ?")
                .bind(day_key.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|r| {
            let day_key = r.day_key.parse().ok()?;
            Some(DailyUsage {
                day_key,
                zone1_used: r.zone1_used,
                zone1_limit: r.zone1_limit,
                zone2_used: r.zone2_used,
                zone2_limit: r.zone2_limit,
                updated_at: r.updated_at,
            })
        }))
    }
}
