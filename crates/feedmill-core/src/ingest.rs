//! Subscription sync and per-tick article fetching
//!
//! Two entry points, both driven by the schedule handler: a full
//! subscription-list sync, and one rotation tick that pages through a
//! single subscription's stream contents and persists new articles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use feedmill_inoreader::types::{ApiSubscription, StreamContentsResponse, SubscriptionList};
use feedmill_inoreader::InoreaderClient;
use feedmill_storage::{Store, SubscriptionRecord};
use feedmill_summarize::strip_control_chars;

use crate::error::{CoreError, Result};
use crate::rotation::{NextSubscription, SubscriptionRotator};

/// Remote feed API seam, satisfied by the Inoreader client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedApi: Send + Sync {
    /// Pull the full subscription list.
    async fn subscription_list(&self) -> feedmill_inoreader::Result<SubscriptionList>;

    /// One page of stream contents.
    async fn stream_contents(
        &self,
        stream_id: &str,
        page_size: u32,
        continuation: Option<String>,
    ) -> feedmill_inoreader::Result<StreamContentsResponse>;
}

#[async_trait]
impl FeedApi for InoreaderClient {
    async fn subscription_list(&self) -> feedmill_inoreader::Result<SubscriptionList> {
        InoreaderClient::subscription_list(self).await
    }

    async fn stream_contents(
        &self,
        stream_id: &str,
        page_size: u32,
        continuation: Option<String>,
    ) -> feedmill_inoreader::Result<StreamContentsResponse> {
        InoreaderClient::stream_contents(self, stream_id, page_size, continuation.as_deref()).await
    }
}

/// Ingestion tuning.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Items requested per stream-contents page
    pub page_size: u32,
    /// Pages fetched per rotation tick
    pub max_pages_per_tick: u32,
    /// Deadline for one subscription's tick
    pub per_subscription_timeout: Duration,
    /// Deadline for a full subscription sync
    pub sync_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_pages_per_tick: 2,
            per_subscription_timeout: Duration::from_secs(10 * 60),
            sync_timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Result of a subscription sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub remote_count: u64,
    pub upserted: u64,
    pub failed: u64,
}

/// Result of one rotation tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationOutcome {
    /// Subscription processed this tick; `None` when nothing was due
    pub subscription_id: Option<String>,
    pub fetched: u64,
    pub saved: u64,
    pub skipped: u64,
    pub failed: u64,
    pub has_more_pages: bool,
    pub continuation: Option<String>,
    /// Every subscription was already processed today
    pub all_done: bool,
}

/// Pulls articles from the remote API into storage.
pub struct IngestService<A: FeedApi> {
    api: Arc<A>,
    store: Store,
    rotator: Arc<SubscriptionRotator>,
    config: IngestConfig,
}

impl<A: FeedApi> IngestService<A> {
    /// Create the service.
    #[must_use]
    pub fn new(
        api: Arc<A>,
        store: Store,
        rotator: Arc<SubscriptionRotator>,
        config: IngestConfig,
    ) -> Self {
        Self {
            api,
            store,
            rotator,
            config,
        }
    }

    /// Pull the full subscription list, upsert it, and reload the
    /// rotator. Per-row persistence failures are tolerated as long as
    /// at least one row landed.
    pub async fn execute_subscription_sync(&self) -> Result<SyncOutcome> {
        tokio::time::timeout(self.config.sync_timeout, self.sync_inner())
            .await
            .map_err(|_| CoreError::Internal("subscription sync timed out".to_string()))?
    }

    async fn sync_inner(&self) -> Result<SyncOutcome> {
        let list = self.api.subscription_list().await?;
        let records: Vec<SubscriptionRecord> =
            list.subscriptions.iter().map(to_record).collect();

        let stats = self.store.upsert_subscriptions(&records).await?;
        if !records.is_empty() && stats.upserted == 0 {
            return Err(CoreError::Internal(
                "subscription sync persisted no rows".to_string(),
            ));
        }

        let ids = self.store.list_subscription_ids().await?;
        self.rotator.load_subscriptions(ids).await;

        info!(
            remote = records.len(),
            upserted = stats.upserted,
            failed = stats.failed,
            "subscription sync complete"
        );
        Ok(SyncOutcome {
            remote_count: records.len() as u64,
            upserted: stats.upserted,
            failed: stats.failed,
        })
    }

    /// Process the next due subscription: page through its stream
    /// contents and persist new articles. The rotation cursor advances
    /// only after a successful tick.
    pub async fn process_next_rotation(&self) -> Result<RotationOutcome> {
        let id = match self.rotator.next().await {
            NextSubscription::Next(id) => id,
            NextSubscription::AllDone => {
                debug!("rotation complete for today");
                return Ok(RotationOutcome {
                    all_done: true,
                    ..RotationOutcome::default()
                });
            }
            NextSubscription::Empty => {
                debug!("no subscriptions loaded, skipping rotation tick");
                return Ok(RotationOutcome {
                    all_done: true,
                    ..RotationOutcome::default()
                });
            }
        };

        let outcome = tokio::time::timeout(
            self.config.per_subscription_timeout,
            self.fetch_subscription(&id),
        )
        .await
        .map_err(|_| CoreError::Internal(format!("article fetch for {id} timed out")))??;

        if outcome.failed > 0 && outcome.saved == 0 && outcome.fetched > 0 {
            return Err(CoreError::Internal(format!(
                "article fetch for {id} persisted nothing ({} failures)",
                outcome.failed
            )));
        }

        self.rotator.mark_processed(&id).await;
        info!(
            subscription = %id,
            fetched = outcome.fetched,
            saved = outcome.saved,
            skipped = outcome.skipped,
            has_more = outcome.has_more_pages,
            "rotation tick complete"
        );
        Ok(outcome)
    }

    async fn fetch_subscription(&self, id: &str) -> Result<RotationOutcome> {
        let mut outcome = RotationOutcome {
            subscription_id: Some(id.to_string()),
            ..RotationOutcome::default()
        };
        let mut continuation: Option<String> = None;

        for _ in 0..self.config.max_pages_per_tick {
            let page = self
                .api
                .stream_contents(id, self.config.page_size, continuation.clone())
                .await?;

            outcome.fetched += page.items.len() as u64;
            let mut page_saved = 0u64;
            for item in &page.items {
                let Some(url) = item.canonical_url() else {
                    outcome.skipped += 1;
                    continue;
                };
                let content = strip_control_chars(item.content_html());
                match self.store.save_article(url, &item.title, &content).await {
                    Ok(saved) if saved.created => {
                        outcome.saved += 1;
                        page_saved += 1;
                    }
                    Ok(_) => outcome.skipped += 1,
                    Err(e) => {
                        warn!(url, "failed to persist article: {e}");
                        outcome.failed += 1;
                    }
                }
            }

            continuation = page.continuation.clone().filter(|c| !c.is_empty());
            outcome.continuation = continuation.clone();
            outcome.has_more_pages = continuation.is_some();

            if continuation.is_none() {
                break;
            }
            // A page with zero new items means the remainder is almost
            // certainly already stored; stop instead of chasing a
            // possibly echoing continuation.
            if page_saved == 0 {
                break;
            }
        }

        Ok(outcome)
    }
}

fn to_record(subscription: &ApiSubscription) -> SubscriptionRecord {
    SubscriptionRecord {
        id: subscription.id.clone(),
        stream_id: subscription.id.clone(),
        title: subscription.title.clone(),
        url: subscription.url.clone(),
        html_url: subscription.html_url.clone(),
        categories: subscription
            .categories
            .iter()
            .map(|c| c.label.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::RotatorConfig;
    use feedmill_inoreader::types::{ArticleItem, ItemContent, ItemLink};
    use tempfile::TempDir;

    async fn temp_store() -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::from_path(&dir.path().join("ingest-test.db"))
            .await
            .unwrap();
        (store, dir)
    }

    fn fixed_rotator() -> Arc<SubscriptionRotator> {
        Arc::new(SubscriptionRotator::new(RotatorConfig {
            enable_random_start: false,
            article_fetch_interval: Duration::from_secs(1800),
        }))
    }

    fn item(url: &str, title: &str) -> ArticleItem {
        ArticleItem {
            id: format!("item-{url}"),
            title: title.to_string(),
            published: 1_700_000_000,
            canonical: vec![ItemLink {
                href: url.to_string(),
            }],
            alternate: vec![],
            summary: Some(ItemContent {
                direction: "ltr".to_string(),
                content: format!("<p>{title}\u{0} body</p>"),
            }),
            origin: None,
            categories: vec![],
            author: None,
        }
    }

    fn page(items: Vec<ArticleItem>, continuation: Option<&str>) -> StreamContentsResponse {
        StreamContentsResponse {
            items,
            continuation: continuation.map(str::to_string),
        }
    }

    fn subscription(id: &str, title: &str) -> ApiSubscription {
        ApiSubscription {
            id: id.to_string(),
            title: title.to_string(),
            categories: vec![],
            url: format!("http://{title}.example/rss"),
            html_url: format!("http://{title}.example"),
            icon_url: String::new(),
        }
    }

    #[tokio::test]
    async fn test_sync_upserts_and_loads_rotator() {
        let (store, _dir) = temp_store().await;
        let rotator = fixed_rotator();

        let mut api = MockFeedApi::new();
        api.expect_subscription_list().times(1).returning(|| {
            Ok(SubscriptionList {
                subscriptions: vec![subscription("feed/b", "b"), subscription("feed/a", "a")],
            })
        });

        let service = IngestService::new(
            Arc::new(api),
            store.clone(),
            Arc::clone(&rotator),
            IngestConfig::default(),
        );

        let outcome = service.execute_subscription_sync().await.unwrap();
        assert_eq!(outcome.remote_count, 2);
        assert_eq!(outcome.upserted, 2);
        assert_eq!(outcome.failed, 0);

        assert_eq!(store.feed_amount().await.unwrap(), 2);
        // The rotator got the new set in deterministic order.
        assert_eq!(rotator.stats().await.total_subscriptions, 2);
        assert_eq!(
            rotator.next().await,
            NextSubscription::Next("feed/a".to_string())
        );
    }

    #[tokio::test]
    async fn test_sync_with_empty_remote_list() {
        let (store, _dir) = temp_store().await;
        let mut api = MockFeedApi::new();
        api.expect_subscription_list()
            .returning(|| Ok(SubscriptionList {
                subscriptions: vec![],
            }));

        let service = IngestService::new(
            Arc::new(api),
            store,
            fixed_rotator(),
            IngestConfig::default(),
        );
        let outcome = service.execute_subscription_sync().await.unwrap();
        assert_eq!(outcome.remote_count, 0);
        assert_eq!(outcome.upserted, 0);
    }

    #[tokio::test]
    async fn test_sync_propagates_quota_errors() {
        let (store, _dir) = temp_store().await;
        let mut api = MockFeedApi::new();
        api.expect_subscription_list()
            .returning(|| Err(feedmill_inoreader::Error::RateLimited));

        let service = IngestService::new(
            Arc::new(api),
            store,
            fixed_rotator(),
            IngestConfig::default(),
        );
        assert!(matches!(
            service.execute_subscription_sync().await,
            Err(CoreError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn test_rotation_tick_saves_new_articles() {
        let (store, _dir) = temp_store().await;
        let rotator = fixed_rotator();
        rotator
            .load_subscriptions(vec!["feed/a".into(), "feed/b".into()])
            .await;

        let mut api = MockFeedApi::new();
        api.expect_stream_contents()
            .withf(|id, _, cont| id == "feed/a" && cont.is_none())
            .times(1)
            .returning(|_, _, _| {
                Ok(page(
                    vec![
                        item("http://a.example/1", "One"),
                        item("http://a.example/2", "Two"),
                    ],
                    None,
                ))
            });

        let service = IngestService::new(
            Arc::new(api),
            store.clone(),
            Arc::clone(&rotator),
            IngestConfig::default(),
        );

        let outcome = service.process_next_rotation().await.unwrap();
        assert_eq!(outcome.subscription_id.as_deref(), Some("feed/a"));
        assert_eq!(outcome.fetched, 2);
        assert_eq!(outcome.saved, 2);
        assert_eq!(outcome.skipped, 0);
        assert!(!outcome.has_more_pages);

        // Control characters were stripped before persistence.
        let article = store
            .fetch_article_by_url("http://a.example/1")
            .await
            .unwrap()
            .unwrap();
        assert!(!article.content.contains('\u{0}'));

        // The cursor advanced.
        assert_eq!(
            rotator.next().await,
            NextSubscription::Next("feed/b".to_string())
        );
    }

    #[tokio::test]
    async fn test_rotation_tick_skips_known_articles() {
        let (store, _dir) = temp_store().await;
        store
            .save_article("http://a.example/1", "One", "body")
            .await
            .unwrap();

        let rotator = fixed_rotator();
        rotator.load_subscriptions(vec!["feed/a".into()]).await;

        let mut api = MockFeedApi::new();
        api.expect_stream_contents()
            .returning(|_, _, _| Ok(page(vec![item("http://a.example/1", "One")], None)));

        let service = IngestService::new(
            Arc::new(api),
            store.clone(),
            rotator,
            IngestConfig::default(),
        );

        let outcome = service.process_next_rotation().await.unwrap();
        assert_eq!(outcome.saved, 0);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(store.total_articles().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rotation_tick_pages_until_bound() {
        let (store, _dir) = temp_store().await;
        let rotator = fixed_rotator();
        rotator.load_subscriptions(vec!["feed/a".into()]).await;

        let mut api = MockFeedApi::new();
        api.expect_stream_contents()
            .withf(|_, _, cont| cont.is_none())
            .times(1)
            .returning(|_, _, _| {
                Ok(page(vec![item("http://a.example/1", "One")], Some("c1")))
            });
        api.expect_stream_contents()
            .withf(|_, _, cont| cont.as_deref() == Some("c1"))
            .times(1)
            .returning(|_, _, _| {
                Ok(page(vec![item("http://a.example/2", "Two")], Some("c2")))
            });

        let service = IngestService::new(
            Arc::new(api),
            store,
            rotator,
            IngestConfig {
                max_pages_per_tick: 2,
                ..IngestConfig::default()
            },
        );

        let outcome = service.process_next_rotation().await.unwrap();
        assert_eq!(outcome.saved, 2);
        // Page budget exhausted with a continuation still pending.
        assert!(outcome.has_more_pages);
        assert_eq!(outcome.continuation.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_all_duplicate_page_stops_pagination() {
        let (store, _dir) = temp_store().await;
        store
            .save_article("http://a.example/1", "One", "")
            .await
            .unwrap();

        let rotator = fixed_rotator();
        rotator.load_subscriptions(vec!["feed/a".into()]).await;

        let mut api = MockFeedApi::new();
        // Remote echoes a continuation with nothing new; only one call
        // must be made even with budget left.
        api.expect_stream_contents()
            .times(1)
            .returning(|_, _, _| {
                Ok(page(vec![item("http://a.example/1", "One")], Some("echo")))
            });

        let service = IngestService::new(
            Arc::new(api),
            store,
            rotator,
            IngestConfig {
                max_pages_per_tick: 5,
                ..IngestConfig::default()
            },
        );

        let outcome = service.process_next_rotation().await.unwrap();
        assert_eq!(outcome.saved, 0);
        assert_eq!(outcome.skipped, 1);
        assert!(outcome.has_more_pages);
    }

    #[tokio::test]
    async fn test_failed_tick_does_not_advance_rotation() {
        let (store, _dir) = temp_store().await;
        let rotator = fixed_rotator();
        rotator.load_subscriptions(vec!["feed/a".into()]).await;

        let mut api = MockFeedApi::new();
        api.expect_stream_contents()
            .times(1)
            .returning(|_, _, _| {
                Err(feedmill_inoreader::Error::QuotaExceeded {
                    zone: feedmill_inoreader::QuotaZone::Zone1,
                    reason: "buffer reached".to_string(),
                })
            });

        let service = IngestService::new(
            Arc::new(api),
            store,
            Arc::clone(&rotator),
            IngestConfig::default(),
        );

        assert!(matches!(
            service.process_next_rotation().await,
            Err(CoreError::RateLimited(_))
        ));
        // The same subscription is due again next tick.
        assert_eq!(
            rotator.next().await,
            NextSubscription::Next("feed/a".to_string())
        );
    }

    #[tokio::test]
    async fn test_item_without_links_is_skipped() {
        let (store, _dir) = temp_store().await;
        let rotator = fixed_rotator();
        rotator.load_subscriptions(vec!["feed/a".into()]).await;

        let mut bare = item("http://a.example/1", "One");
        bare.canonical.clear();
        bare.alternate.clear();

        let mut api = MockFeedApi::new();
        api.expect_stream_contents()
            .returning(move |_, _, _| Ok(page(vec![bare.clone()], None)));

        let service = IngestService::new(
            Arc::new(api),
            store.clone(),
            rotator,
            IngestConfig::default(),
        );

        let outcome = service.process_next_rotation().await.unwrap();
        assert_eq!(outcome.fetched, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(store.total_articles().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_all_done_when_everything_processed() {
        let (store, _dir) = temp_store().await;
        let rotator = fixed_rotator();
        rotator.load_subscriptions(vec!["feed/a".into()]).await;
        rotator.mark_processed("feed/a").await;

        let api = MockFeedApi::new();
        let service = IngestService::new(
            Arc::new(api),
            store,
            rotator,
            IngestConfig::default(),
        );

        let outcome = service.process_next_rotation().await.unwrap();
        assert!(outcome.all_done);
        assert!(outcome.subscription_id.is_none());
    }
}
