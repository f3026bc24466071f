//! Article resolution and streaming summarization fan-out
//!
//! Resolves a summarize request onto one canonical article, short-
//! circuits on a cached summary, and otherwise relays the
//! pre-processor's SSE chunks to the caller while capturing the full
//! text for idempotent persistence.
//!
//! The upstream call runs on a detached cancellation token with its own
//! deadline: a flaky client does not kill an expensive generation, but
//! a definitive client cancel propagates through a monitor task.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use feedmill_storage::Store;
use feedmill_summarize::{extract, extract_sse_data, PreProcessorClient, SseEventBuffer};

use crate::circuit::CircuitBreaker;
use crate::error::{CoreError, Result};
use crate::urlfetch::UrlContentFetcher;

/// Inputs of a summarize call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummarizeRequest {
    pub article_id: Option<String>,
    pub feed_url: Option<String>,
    pub content: Option<String>,
    pub title: Option<String>,
}

/// The canonical article a request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArticle {
    pub id: String,
    pub title: String,
    pub content: String,
}

/// One frame on the summarize stream.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamResponseChunk {
    pub chunk: String,
    pub is_final: bool,
    pub article_id: String,
    pub is_cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_summary: Option<String>,
}

/// Summarization tuning.
#[derive(Debug, Clone)]
pub struct SummarizeConfig {
    /// Deadline of the detached upstream call
    pub upstream_timeout: Duration,
    /// Deadline for URL content fetches
    pub fetch_timeout: Duration,
    /// Body cap for URL content fetches
    pub fetch_max_bytes: usize,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(10 * 60),
            fetch_timeout: Duration::from_secs(10),
            fetch_max_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Resolves articles and fans out summarize streams.
pub struct SummarizeService {
    store: Store,
    pre_processor: Arc<PreProcessorClient>,
    breaker: Arc<CircuitBreaker>,
    fetcher: UrlContentFetcher,
    config: SummarizeConfig,
}

impl SummarizeService {
    /// Create the service.
    pub fn new(
        store: Store,
        pre_processor: Arc<PreProcessorClient>,
        breaker: Arc<CircuitBreaker>,
        config: SummarizeConfig,
    ) -> Result<Self> {
        let fetcher = UrlContentFetcher::new(config.fetch_timeout, config.fetch_max_bytes)?;
        Ok(Self {
            store,
            pre_processor,
            breaker,
            fetcher,
            config,
        })
    }

    /// Locate or create the canonical article for a request.
    ///
    /// Precedence: article id (repository text is authoritative, the
    /// request body never overrides it), then feed URL (reuse, persist
    /// supplied content, or fetch-and-extract).
    pub async fn resolve(&self, request: &SummarizeRequest) -> Result<ResolvedArticle> {
        let req_content = request
            .content
            .as_deref()
            .filter(|c| !c.trim().is_empty());
        let req_title = request.title.as_deref().unwrap_or("").trim();

        if let Some(id) = request.article_id.as_deref().filter(|s| !s.trim().is_empty()) {
            let article = self
                .store
                .fetch_article_by_id(id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("article {id}")))?;

            if !article.content.trim().is_empty() {
                return Ok(ResolvedArticle {
                    id: article.id,
                    title: article.title,
                    content: article.content,
                });
            }
            if let Some(content) = req_content {
                let title = if req_title.is_empty() {
                    article.title
                } else {
                    req_title.to_string()
                };
                return Ok(ResolvedArticle {
                    id: article.id,
                    title,
                    content: content.to_string(),
                });
            }
            return Err(CoreError::InvalidArgument("content is empty".to_string()));
        }

        if let Some(url) = request.feed_url.as_deref().filter(|s| !s.trim().is_empty()) {
            if let Some(article) = self.store.fetch_article_by_url(url).await? {
                if !article.content.trim().is_empty() {
                    return Ok(ResolvedArticle {
                        id: article.id,
                        title: article.title,
                        content: article.content,
                    });
                }
                if let Some(content) = req_content {
                    return Ok(ResolvedArticle {
                        id: article.id,
                        title: article.title,
                        content: content.to_string(),
                    });
                }
                return Err(CoreError::InvalidArgument("content is empty".to_string()));
            }

            if let Some(content) = req_content {
                let saved = self.store.save_article(url, req_title, content).await?;
                return Ok(ResolvedArticle {
                    id: saved.id,
                    title: req_title.to_string(),
                    content: content.to_string(),
                });
            }

            let html = self.fetcher.fetch(url).await?;
            let extracted = extract::extract_article(&html);
            let title = extracted
                .title
                .clone()
                .unwrap_or_else(|| req_title.to_string());
            let saved = self.store.save_article(url, &title, &extracted.text).await?;
            return Ok(ResolvedArticle {
                id: saved.id,
                title,
                content: extracted.text,
            });
        }

        Err(CoreError::InvalidArgument(
            "feed_url or article_id is required".to_string(),
        ))
    }

    /// Start a summarize stream for a request.
    ///
    /// A cached summary produces exactly one terminal frame. Otherwise
    /// the pre-processor stream is decoded and relayed; on upstream EOF
    /// the concatenated text persists (failure logged, not propagated)
    /// and the final frame carries it.
    pub async fn stream(
        &self,
        request: SummarizeRequest,
        user_id: String,
        client_token: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamResponseChunk>> {
        let resolved = self.resolve(&request).await?;

        if let Some(existing) = self
            .store
            .fetch_article_summary_by_article_id(&resolved.id)
            .await?
        {
            if !existing.summary.trim().is_empty() {
                debug!(article_id = %resolved.id, "summary cache hit");
                let (tx, rx) = mpsc::channel(1);
                let _ = tx
                    .send(StreamResponseChunk {
                        chunk: String::new(),
                        is_final: true,
                        article_id: resolved.id.clone(),
                        is_cached: true,
                        full_summary: Some(existing.summary),
                    })
                    .await;
                return Ok(rx);
            }
        }

        // The upstream call lives on its own token: the client token is
        // only wired in through the monitor, and a deadline task bounds
        // the generation.
        let detached = CancellationToken::new();
        {
            let detached = detached.clone();
            let client = client_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = client.cancelled() => {
                        debug!("client disconnected, canceling upstream");
                        detached.cancel();
                    }
                    () = detached.cancelled() => {}
                }
            });
        }
        {
            let detached = detached.clone();
            let deadline = self.config.upstream_timeout;
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(deadline) => {
                        warn!("summarize upstream deadline reached");
                        detached.cancel();
                    }
                    () = detached.cancelled() => {}
                }
            });
        }

        self.breaker
            .acquire()
            .await
            .map_err(|e| CoreError::RateLimited(e.to_string()))?;
        let upstream = match self
            .pre_processor
            .stream_summarize(
                &resolved.content,
                &resolved.id,
                &resolved.title,
                detached.clone(),
            )
            .await
        {
            Ok(rx) => {
                self.breaker.record_success().await;
                rx
            }
            Err(e) => {
                self.breaker.record_failure().await;
                detached.cancel();
                return Err(e.into());
            }
        };

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(relay(
            upstream,
            tx,
            self.store.clone(),
            resolved.id,
            resolved.title,
            user_id,
            detached,
        ));
        Ok(rx)
    }
}

/// Decode upstream bytes into chunk frames, capture the full text and
/// persist it once the upstream flushed EOF. A dropped client receiver
/// cancels the detached token; a partial text is then dropped.
async fn relay(
    mut upstream: mpsc::Receiver<feedmill_summarize::Result<Vec<u8>>>,
    tx: mpsc::Sender<StreamResponseChunk>,
    store: Store,
    article_id: String,
    title: String,
    user_id: String,
    detached: CancellationToken,
) {
    let mut buf = SseEventBuffer::new();
    let mut full = String::new();
    let mut completed = false;

    'read: loop {
        match upstream.recv().await {
            Some(Ok(bytes)) => {
                for event in buf.push(&bytes) {
                    let Some(fragment) = extract_sse_data(&event) else {
                        continue;
                    };
                    if fragment.is_empty() {
                        continue;
                    }
                    full.push_str(&fragment);
                    let frame = StreamResponseChunk {
                        chunk: fragment,
                        is_final: false,
                        article_id: article_id.clone(),
                        is_cached: false,
                        full_summary: None,
                    };
                    if tx.send(frame).await.is_err() {
                        debug!(%article_id, "client receiver dropped, canceling upstream");
                        break 'read;
                    }
                }
            }
            Some(Err(feedmill_summarize::Error::Canceled)) => {
                debug!(%article_id, "summarize stream canceled upstream-side");
                break;
            }
            Some(Err(e)) => {
                warn!(%article_id, "summarize stream failed: {e}");
                break;
            }
            None => {
                completed = true;
                break;
            }
        }
    }

    if completed {
        if let Some(tail) = buf.finish() {
            if let Some(fragment) = extract_sse_data(&tail) {
                if !fragment.is_empty() {
                    full.push_str(&fragment);
                    let _ = tx
                        .send(StreamResponseChunk {
                            chunk: fragment,
                            is_final: false,
                            article_id: article_id.clone(),
                            is_cached: false,
                            full_summary: None,
                        })
                        .await;
                }
            }
        }

        if !full.is_empty() {
            // The client already holds the text; a failed write must
            // not turn a successful stream into an error.
            if let Err(e) = store
                .save_article_summary(&article_id, &user_id, &title, &full)
                .await
            {
                warn!(%article_id, "failed to persist summary: {e}");
            }
        }

        let _ = tx
            .send(StreamResponseChunk {
                chunk: String::new(),
                is_final: true,
                article_id: article_id.clone(),
                is_cached: false,
                full_summary: Some(full),
            })
            .await;
    } else {
        debug!(%article_id, "stream did not complete, dropping partial text");
    }

    detached.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBreakerConfig;
    use httpmock::prelude::*;
    use tempfile::TempDir;

    async fn temp_store() -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::from_path(&dir.path().join("summarize-test.db"))
            .await
            .unwrap();
        (store, dir)
    }

    fn service(store: Store, server: &MockServer) -> SummarizeService {
        SummarizeService::new(
            store,
            Arc::new(PreProcessorClient::new(server.base_url()).unwrap()),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
            SummarizeConfig::default(),
        )
        .unwrap()
    }

    // ── resolve ──

    #[tokio::test]
    async fn test_resolve_requires_id_or_url() {
        let (store, _dir) = temp_store().await;
        let server = MockServer::start_async().await;
        let service = service(store, &server);

        let err = service
            .resolve(&SummarizeRequest::default())
            .await
            .unwrap_err();
        match err {
            CoreError::InvalidArgument(msg) => {
                assert_eq!(msg, "feed_url or article_id is required");
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_db_content_is_authoritative() {
        let (store, _dir) = temp_store().await;
        let server = MockServer::start_async().await;
        let saved = store
            .save_article("http://a.example/1", "DB title", "db content")
            .await
            .unwrap();
        let service = service(store, &server);

        let resolved = service
            .resolve(&SummarizeRequest {
                article_id: Some(saved.id.clone()),
                content: Some("client-supplied override".to_string()),
                title: Some("client title".to_string()),
                ..SummarizeRequest::default()
            })
            .await
            .unwrap();

        // Request content is ignored when the repository has text.
        assert_eq!(resolved.content, "db content");
        assert_eq!(resolved.title, "DB title");
    }

    #[tokio::test]
    async fn test_resolve_empty_db_content_falls_back_to_request() {
        let (store, _dir) = temp_store().await;
        let server = MockServer::start_async().await;
        let saved = store
            .save_article("http://a.example/1", "DB title", "")
            .await
            .unwrap();
        let service = service(store, &server);

        let resolved = service
            .resolve(&SummarizeRequest {
                article_id: Some(saved.id.clone()),
                content: Some("request body".to_string()),
                ..SummarizeRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(resolved.content, "request body");

        let err = service
            .resolve(&SummarizeRequest {
                article_id: Some(saved.id),
                ..SummarizeRequest::default()
            })
            .await
            .unwrap_err();
        match err {
            CoreError::InvalidArgument(msg) => assert_eq!(msg, "content is empty"),
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_unknown_article_id() {
        let (store, _dir) = temp_store().await;
        let server = MockServer::start_async().await;
        let service = service(store, &server);

        let err = service
            .resolve(&SummarizeRequest {
                article_id: Some("missing".to_string()),
                ..SummarizeRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_by_url_persists_request_content() {
        let (store, _dir) = temp_store().await;
        let server = MockServer::start_async().await;
        let service = service(store.clone(), &server);

        let resolved = service
            .resolve(&SummarizeRequest {
                feed_url: Some("http://new.example/article".to_string()),
                content: Some("posted content".to_string()),
                title: Some("Posted".to_string()),
                ..SummarizeRequest::default()
            })
            .await
            .unwrap();

        let stored = store
            .fetch_article_by_url("http://new.example/article")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, resolved.id);
        assert_eq!(stored.content, "posted content");
    }

    #[tokio::test]
    async fn test_resolve_by_url_reuses_existing_row() {
        let (store, _dir) = temp_store().await;
        let server = MockServer::start_async().await;
        let saved = store
            .save_article("http://a.example/1", "Known", "known body")
            .await
            .unwrap();
        let service = service(store, &server);

        let resolved = service
            .resolve(&SummarizeRequest {
                feed_url: Some("http://a.example/1".to_string()),
                ..SummarizeRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(resolved.id, saved.id);
        assert_eq!(resolved.content, "known body");
    }

    #[tokio::test]
    async fn test_resolve_rejects_disallowed_fetch_url() {
        let (store, _dir) = temp_store().await;
        let server = MockServer::start_async().await;
        let service = service(store, &server);

        // Unknown URL with no content forces a fetch, which the egress
        // gate refuses for loopback hosts.
        let err = service
            .resolve(&SummarizeRequest {
                feed_url: Some("http://127.0.0.1/article".to_string()),
                ..SummarizeRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    // ── stream ──

    #[tokio::test]
    async fn test_cache_hit_emits_single_terminal_frame() {
        let (store, _dir) = temp_store().await;
        let server = MockServer::start_async().await;
        let upstream_mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/summarize/stream");
                then.status(200).body("data: \"should not run\"\n\n");
            })
            .await;

        let saved = store
            .save_article("http://a.example/1", "A", "body")
            .await
            .unwrap();
        store
            .save_article_summary(&saved.id, "user-1", "A", "已缓存")
            .await
            .unwrap();

        let service = service(store, &server);
        let mut rx = service
            .stream(
                SummarizeRequest {
                    article_id: Some(saved.id.clone()),
                    ..SummarizeRequest::default()
                },
                "user-1".to_string(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert!(frame.is_final);
        assert!(frame.is_cached);
        assert_eq!(frame.chunk, "");
        assert_eq!(frame.full_summary.as_deref(), Some("已缓存"));
        // No further frames.
        assert!(rx.recv().await.is_none());
        // No upstream request was issued.
        upstream_mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_stream_decodes_relays_and_persists() {
        let (store, _dir) = temp_store().await;
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/summarize/stream");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body("data: \"\\u3053\\u3093\\u306b\\u3061\\u306f\"\n\ndata: \"\\u4e16\\u754c\"\n\n");
            })
            .await;

        let saved = store
            .save_article("http://a.example/1", "A", "body")
            .await
            .unwrap();

        let service = service(store.clone(), &server);
        let mut rx = service
            .stream(
                SummarizeRequest {
                    article_id: Some(saved.id.clone()),
                    ..SummarizeRequest::default()
                },
                "user-1".to_string(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].chunk, "こんにちは");
        assert_eq!(frames[1].chunk, "世界");
        assert!(frames[2].is_final);
        assert!(!frames[2].is_cached);
        assert_eq!(frames[2].full_summary.as_deref(), Some("こんにちは世界"));

        let persisted = store
            .fetch_article_summary_by_article_id(&saved.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.summary, "こんにちは世界");
        assert_eq!(persisted.user_id, "user-1");
    }

    // ── relay (driven directly for disconnect/error paths) ──

    #[tokio::test]
    async fn test_relay_flushes_trailing_event_on_eof() {
        let (store, _dir) = temp_store().await;
        let saved = store
            .save_article("http://a.example/1", "T", "body")
            .await
            .unwrap();
        let (up_tx, up_rx) = mpsc::channel(8);
        let (tx, mut rx) = mpsc::channel(8);
        let detached = CancellationToken::new();

        up_tx.send(Ok(b"data: \"body \"\n\n".to_vec())).await.unwrap();
        // Final event without the terminating blank line.
        up_tx.send(Ok(b"data: \"tail\"\n".to_vec())).await.unwrap();
        drop(up_tx);

        relay(
            up_rx,
            tx,
            store.clone(),
            saved.id.clone(),
            "T".to_string(),
            "user-1".to_string(),
            detached.clone(),
        )
        .await;

        let mut chunks = Vec::new();
        while let Some(frame) = rx.recv().await {
            chunks.push(frame);
        }
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].chunk, "tail");
        assert_eq!(chunks[2].full_summary.as_deref(), Some("body tail"));
        assert!(detached.is_cancelled());

        let persisted = store
            .fetch_article_summary_by_article_id(&saved.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.summary, "body tail");
    }

    #[tokio::test]
    async fn test_relay_client_disconnect_cancels_and_drops_partial() {
        let (store, _dir) = temp_store().await;
        let saved = store
            .save_article("http://a.example/1", "T", "body")
            .await
            .unwrap();
        let (up_tx, up_rx) = mpsc::channel(8);
        let (tx, rx) = mpsc::channel(8);
        let detached = CancellationToken::new();

        // The client is gone before any frame is delivered.
        drop(rx);
        up_tx.send(Ok(b"data: \"one\"\n\n".to_vec())).await.unwrap();

        relay(
            up_rx,
            tx,
            store.clone(),
            saved.id.clone(),
            "T".to_string(),
            "user-1".to_string(),
            detached.clone(),
        )
        .await;

        assert!(detached.is_cancelled());
        // No partial persisted.
        assert!(store
            .fetch_article_summary_by_article_id(&saved.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_relay_upstream_error_means_no_final_frame() {
        let (store, _dir) = temp_store().await;
        let saved = store
            .save_article("http://a.example/1", "T", "body")
            .await
            .unwrap();
        let (up_tx, up_rx) = mpsc::channel(8);
        let (tx, mut rx) = mpsc::channel(8);

        up_tx.send(Ok(b"data: \"partial\"\n\n".to_vec())).await.unwrap();
        up_tx
            .send(Err(feedmill_summarize::Error::Network("reset".to_string())))
            .await
            .unwrap();
        drop(up_tx);

        relay(
            up_rx,
            tx,
            store.clone(),
            saved.id.clone(),
            "T".to_string(),
            "user-1".to_string(),
            CancellationToken::new(),
        )
        .await;

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        // The partial chunk went out but no terminal frame followed.
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].is_final);
        assert!(store
            .fetch_article_summary_by_article_id(&saved.id)
            .await
            .unwrap()
            .is_none());
    }
}
