//! Bounded URL content fetching
//!
//! Used by the summarization resolver when a request names a URL the
//! repository has never seen. The URL must pass the egress gate (public
//! http/https hosts only) and the body read is capped.

use std::net::IpAddr;
use std::time::Duration;

use futures_util::StreamExt;
use tracing::debug;
use url::Url;

use crate::error::{CoreError, Result};

/// Fetches remote page content under strict limits.
pub struct UrlContentFetcher {
    http: reqwest::Client,
    max_bytes: usize,
}

impl UrlContentFetcher {
    /// Create a fetcher with a total deadline and a body size cap.
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build fetch client: {e}")))?;
        Ok(Self { http, max_bytes })
    }

    /// Validate and fetch `raw_url`, returning at most `max_bytes` of
    /// body decoded as UTF-8 (lossy).
    pub async fn fetch(&self, raw_url: &str) -> Result<String> {
        let url = validate_external_url(raw_url)?;
        debug!(url = %url, "fetching external content");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| CoreError::Internal(format!("content fetch failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Upstream {
                status: status.as_u16(),
                body: format!("content fetch returned HTTP {status}"),
            });
        }

        let collected = read_capped(response, self.max_bytes).await?;
        Ok(String::from_utf8_lossy(&collected).into_owned())
    }
}

/// Read at most `max_bytes` of a response body.
async fn read_capped(response: reqwest::Response, max_bytes: usize) -> Result<Vec<u8>> {
    let mut collected: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| CoreError::Internal(format!("content read failed: {e}")))?;
        let room = max_bytes - collected.len();
        if chunk.len() >= room {
            collected.extend_from_slice(&chunk[..room]);
            break;
        }
        collected.extend_from_slice(&chunk);
    }
    Ok(collected)
}

/// Gate outbound fetches: http/https only, no localhost, no private or
/// link-local literals.
pub fn validate_external_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| CoreError::InvalidArgument(format!("invalid url {raw:?}: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CoreError::InvalidArgument(format!(
                "unsupported url scheme {other:?}"
            )))
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| CoreError::InvalidArgument("url has no host".to_string()))?;

    if host.eq_ignore_ascii_case("localhost") || host.ends_with(".localhost") {
        return Err(CoreError::InvalidArgument("localhost is not allowed".to_string()));
    }

    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        if is_disallowed_ip(ip) {
            return Err(CoreError::InvalidArgument(format!(
                "address {ip} is not routable for content fetch"
            )));
        }
    }

    Ok(url)
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_rejects_bad_schemes_and_hosts() {
        assert!(validate_external_url("ftp://example.com/x").is_err());
        assert!(validate_external_url("file:///etc/passwd").is_err());
        assert!(validate_external_url("http://localhost/x").is_err());
        assert!(validate_external_url("http://foo.localhost/x").is_err());
        assert!(validate_external_url("http://127.0.0.1/x").is_err());
        assert!(validate_external_url("http://10.1.2.3/x").is_err());
        assert!(validate_external_url("http://192.168.0.5/x").is_err());
        assert!(validate_external_url("http://169.254.1.1/x").is_err());
        assert!(validate_external_url("http://[::1]/x").is_err());
        assert!(validate_external_url("not a url").is_err());
    }

    #[test]
    fn test_accepts_public_urls() {
        assert!(validate_external_url("https://example.com/article").is_ok());
        assert!(validate_external_url("http://93.184.216.34/").is_ok());
    }

    #[tokio::test]
    async fn test_read_capped_stops_at_limit() {
        // The egress gate blocks 127.0.0.1, so the capped read is
        // exercised directly against the mock server.
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/big");
                then.status(200).body("x".repeat(1000));
            })
            .await;

        let response = reqwest::get(server.url("/big")).await.unwrap();
        let collected = read_capped(response, 100).await.unwrap();
        assert_eq!(collected.len(), 100);

        let response = reqwest::get(server.url("/big")).await.unwrap();
        let all = read_capped(response, 10_000).await.unwrap();
        assert_eq!(all.len(), 1000);
    }
}
