//! Article repository
//!
//! Articles are created on first sighting and are immutable afterwards
//! except through the explicit content backfill. `save_article` is
//! idempotent on URL: a conflicting insert returns the existing row's id.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::store::Store;

/// A stored article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Result of a `save_article` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Id of the row for this URL (new or pre-existing)
    pub id: String,
    /// `false` when the URL was already present (skip)
    pub created: bool,
}

#[derive(FromRow)]
struct ArticleRow {
    id: String,
    url: String,
    title: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Article {
            id: row.id,
            url: row.url,
            title: row.title,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

impl Store {
    /// Upsert-by-URL. Returns the existing id without touching the row
    /// when the URL is already known.
    pub async fn save_article(&self, url: &str, title: &str, content: &str) -> Result<SaveOutcome> {
        let id = Uuid::new_v4().to_string();
        let result = sqlx::query(
            r#"
            INSERT INTO articles (id, url, title, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(url)
        .bind(title)
        .bind(content)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(SaveOutcome { id, created: true });
        }

        let existing: (String,) = sqlx::query_as("SELECT id FROM articles WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                StorageError::InvalidRow(format!("conflicting article vanished for url {url}"))
            })?;

        Ok(SaveOutcome {
            id: existing.0,
            created: false,
        })
    }

    /// Fetch an article by id.
    pub async fn fetch_article_by_id(&self, id: &str) -> Result<Option<Article>> {
        let row: Option<ArticleRow> = sqlx::query_as("SELECT * FROM articles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Article::from))
    }

    /// Fetch an article by its unique URL.
    pub async fn fetch_article_by_url(&self, url: &str) -> Result<Option<Article>> {
        let row: Option<ArticleRow> = sqlx::query_as("SELECT * FROM articles WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Article::from))
    }

    /// Explicit backfill of an empty content column.
    pub async fn backfill_article_content(&self, id: &str, content: &str) -> Result<()> {
        let result = sqlx::query("UPDATE articles SET content = ? WHERE id = ?")
            .bind(content)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("article {id}")));
        }
        Ok(())
    }

    /// Page through articles newest-first. `cursor` excludes everything
    /// at or after the given creation time.
    pub async fn list_articles(
        &self,
        cursor: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Article>> {
        let rows: Vec<ArticleRow> = match cursor {
            Some(before) => {
                sqlx::query_as(
                    "SELECT * FROM articles WHERE created_at < ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(before)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM articles ORDER BY created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.into_iter().map(Article::from).collect())
    }

    /// Page through articles `user_id` has not read yet, newest-first.
    pub async fn list_unread_articles(
        &self,
        user_id: &str,
        cursor: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Article>> {
        let rows: Vec<ArticleRow> = sqlx::query_as(
            r#"
            SELECT a.* FROM articles a
            WHERE (? IS NULL OR a.created_at < ?)
              AND NOT EXISTS (
                SELECT 1 FROM article_reads r
                WHERE r.article_id = a.id AND r.user_id = ?
              )
            ORDER BY a.created_at DESC LIMIT ?
            "#,
        )
        .bind(cursor)
        .bind(cursor)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Article::from).collect())
    }

    /// Page through articles `user_id` has read, newest-first.
    pub async fn list_read_articles(
        &self,
        user_id: &str,
        cursor: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Article>> {
        let rows: Vec<ArticleRow> = sqlx::query_as(
            r#"
            SELECT a.* FROM articles a
            JOIN article_reads r ON r.article_id = a.id AND r.user_id = ?
            WHERE (? IS NULL OR a.created_at < ?)
            ORDER BY a.created_at DESC LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(cursor)
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Article::from).collect())
    }

    /// Title substring search, newest-first.
    pub async fn search_articles(&self, query: &str, limit: i64) -> Result<Vec<Article>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let rows: Vec<ArticleRow> = sqlx::query_as(
            r#"
            SELECT * FROM articles
            WHERE title LIKE ? ESCAPE '\'
            ORDER BY created_at DESC LIMIT ?
            "#,
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Article::from).collect())
    }

    /// Mark the article with `url` read for `user_id`.
    ///
    /// Unknown URLs are a `NotFound`, distinct from storage failures.
    pub async fn mark_article_read(&self, user_id: &str, url: &str) -> Result<()> {
        let article = self
            .fetch_article_by_url(url)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("article with url {url}")))?;

        sqlx::query(
            r#"
            INSERT INTO article_reads (user_id, article_id, read_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id, article_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(&article.id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Total stored articles.
    pub async fn total_articles(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Articles with a persisted summary.
    pub async fn summarized_articles_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM articles a WHERE EXISTS \
             (SELECT 1 FROM article_summaries s WHERE s.article_id = a.id)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Articles still waiting for a summary.
    pub async fn unsummarized_articles_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM articles a WHERE NOT EXISTS \
             (SELECT 1 FROM article_summaries s WHERE s.article_id = a.id)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Articles created since `since` and not yet read by `user_id`.
    pub async fn today_unread_articles_count(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM articles a
            WHERE a.created_at >= ?
              AND NOT EXISTS (
                SELECT 1 FROM article_reads r
                WHERE r.article_id = a.id AND r.user_id = ?
              )
            "#,
        )
        .bind(since)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
