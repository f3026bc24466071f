//! Article summary repository
//!
//! At most one summary per article; re-summarization overwrites the
//! previous row unconditionally (both texts are valid products of the
//! same input, so last-write-wins).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::error::Result;
use crate::store::Store;

/// A persisted summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleSummary {
    pub article_id: String,
    pub user_id: String,
    pub title: String,
    pub summary: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct SummaryRow {
    article_id: String,
    user_id: String,
    title: String,
    summary: String,
    updated_at: DateTime<Utc>,
}

impl From<SummaryRow> for ArticleSummary {
    fn from(row: SummaryRow) -> Self {
        ArticleSummary {
            article_id: row.article_id,
            user_id: row.user_id,
            title: row.title,
            summary: row.summary,
            updated_at: row.updated_at,
        }
    }
}

impl Store {
    /// Upsert the summary for an article.
    pub async fn save_article_summary(
        &self,
        article_id: &str,
        user_id: &str,
        title: &str,
        summary: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO article_summaries (article_id, user_id, title, summary, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(article_id) DO UPDATE SET
                user_id = excluded.user_id,
                title = excluded.title,
                summary = excluded.summary,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(article_id)
        .bind(user_id)
        .bind(title)
        .bind(summary)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch the summary for an article, if one exists.
    pub async fn fetch_article_summary_by_article_id(
        &self,
        article_id: &str,
    ) -> Result<Option<ArticleSummary>> {
        let row: Option<SummaryRow> =
            sqlx::query_as("SELECT * FROM article_summaries WHERE article_id = ?")
                .bind(article_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(ArticleSummary::from))
    }
}
