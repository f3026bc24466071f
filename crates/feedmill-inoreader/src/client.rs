//! Typed Inoreader API client
//!
//! Thin layer above the token broker and the rate-limit manager. Every
//! call is gated by the local quota first, carries bearer auth plus a
//! fixed user agent, and feeds response headers back into the manager.
//! A 401 triggers exactly one refresh-and-retry.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{truncate_body, Error, Result};
use crate::oauth::TokenBroker;
use crate::quota::RateLimitManager;
use crate::types::{StreamContentsResponse, SubscriptionList};

/// User agent sent on every API call.
const USER_AGENT: &str = "feedmill/0.2 (+https://github.com/feedmill/feedmill)";

/// Quota-gated, authenticated client for the Inoreader-style API.
pub struct InoreaderClient {
    http: reqwest::Client,
    base_url: String,
    broker: Arc<TokenBroker>,
    quota: Arc<RateLimitManager>,
}

impl InoreaderClient {
    /// Create a client rooted at `base_url` (no trailing slash needed).
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        http: reqwest::Client,
        broker: Arc<TokenBroker>,
        quota: Arc<RateLimitManager>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http,
            base_url,
            broker,
            quota,
        }
    }

    /// `GET /subscription/list`
    pub async fn subscription_list(&self) -> Result<SubscriptionList> {
        self.get_json("/subscription/list", &[]).await
    }

    /// `GET /stream/contents/<streamId>?n=…&c=…`
    pub async fn stream_contents(
        &self,
        stream_id: &str,
        page_size: u32,
        continuation: Option<&str>,
    ) -> Result<StreamContentsResponse> {
        let path = format!("/stream/contents/{}", encode_path_segment(stream_id));
        let mut query = vec![("n".to_string(), page_size.to_string())];
        if let Some(c) = continuation {
            query.push(("c".to_string(), c.to_string()));
        }
        self.get_json(&path, &query).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T> {
        let decision = self.quota.check_allowed(path).await;
        if !decision.allowed {
            warn!(endpoint = path, zone = %decision.zone, "call denied by quota gate");
            return Err(Error::QuotaExceeded {
                zone: decision.zone,
                reason: decision
                    .reason
                    .unwrap_or_else(|| "quota exhausted".to_string()),
            });
        }

        let url = format!("{}{}", self.base_url, path);
        let mut refreshed = false;
        loop {
            let access_token = self.broker.access_token().await?;
            let response = self
                .http
                .get(&url)
                .query(query)
                .bearer_auth(&access_token)
                .header(reqwest::header::USER_AGENT, USER_AGENT)
                .send()
                .await
                .map_err(|e| Error::Network(format!("request to {path} failed: {e}")))?;

            self.quota
                .update_from_headers(response.headers(), path)
                .await;

            let status = response.status();
            if status.is_success() {
                let body = response
                    .text()
                    .await
                    .map_err(|e| Error::Network(format!("failed to read {path} body: {e}")))?;
                return serde_json::from_str(&body)
                    .map_err(|e| Error::Decode(format!("{path}: {e}")));
            }

            match status.as_u16() {
                401 if !refreshed => {
                    debug!(endpoint = path, "401 from remote, refreshing token once");
                    self.broker
                        .refresh_after_auth_failure(&access_token)
                        .await?;
                    refreshed = true;
                }
                401 => return Err(Error::Unauthenticated),
                429 => return Err(Error::RateLimited),
                code => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::Upstream {
                        status: code,
                        body: truncate_body(&body, 300),
                    });
                }
            }
        }
    }
}

/// Percent-encode one path segment (stream ids contain `/` and `:`).
#[must_use]
pub fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => out.push(c),
            _ => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{b:02X}"));
                }
            }
        }
    }
    out
}
