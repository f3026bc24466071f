//! HTTP transport construction
//!
//! All outbound clients are built here so timeout tuning lives in one
//! place. Each timeout is independently overridable through a named
//! environment variable; the token-refresh path additionally disables
//! proxy resolution, with a proxy-respecting fallback client available
//! for networks where direct egress is blocked.

use std::time::Duration;

use crate::error::{Error, Result};

/// Named timeout settings for outbound HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Total request deadline (`HTTP_CLIENT_TIMEOUT`, seconds)
    pub total_timeout: Duration,
    /// TCP connect + TLS handshake deadline (`TLS_HANDSHAKE_TIMEOUT`, seconds)
    pub handshake_timeout: Duration,
    /// Deadline for the response headers / body reads (`RESPONSE_HEADER_TIMEOUT`, seconds)
    pub response_header_timeout: Duration,
    /// How long idle pooled connections are kept (`IDLE_CONN_TIMEOUT`, seconds)
    pub idle_timeout: Duration,
    /// Upper bound on idle connections per host
    pub max_idle_per_host: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(10),
            response_header_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            max_idle_per_host: 8,
        }
    }
}

impl TransportSettings {
    /// Read settings from the environment, keeping defaults for anything
    /// unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(secs) = env_secs("HTTP_CLIENT_TIMEOUT") {
            settings.total_timeout = secs;
        }
        if let Some(secs) = env_secs("TLS_HANDSHAKE_TIMEOUT") {
            settings.handshake_timeout = secs;
        }
        if let Some(secs) = env_secs("RESPONSE_HEADER_TIMEOUT") {
            settings.response_header_timeout = secs;
        }
        if let Some(secs) = env_secs("IDLE_CONN_TIMEOUT") {
            settings.idle_timeout = secs;
        }
        settings
    }

    /// Override the total request deadline.
    #[must_use]
    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = timeout;
        self
    }

    /// Build the primary client. Proxy resolution is disabled so the
    /// token endpoint is always reached directly.
    pub fn build_direct(&self) -> Result<reqwest::Client> {
        self.builder()
            .no_proxy()
            .build()
            .map_err(|e| Error::Network(format!("failed to build http client: {e}")))
    }

    /// Build the fallback client, which honors system proxy settings.
    pub fn build_with_proxy(&self) -> Result<reqwest::Client> {
        self.builder()
            .build()
            .map_err(|e| Error::Network(format!("failed to build http client: {e}")))
    }

    fn builder(&self) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .timeout(self.total_timeout)
            .connect_timeout(self.handshake_timeout)
            .read_timeout(self.response_header_timeout)
            .pool_idle_timeout(self.idle_timeout)
            .pool_max_idle_per_host(self.max_idle_per_host)
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}
