//! Error types for feedmill-inoreader

use thiserror::Error;

/// Inoreader layer error type
#[derive(Debug, Error)]
pub enum Error {
    /// The local safety buffer denied the call before it was issued
    #[error("quota exceeded for {zone}: {reason}")]
    QuotaExceeded {
        /// Zone the denied endpoint belongs to
        zone: crate::quota::QuotaZone,
        /// Human-readable denial reason
        reason: String,
    },

    /// Remote returned 429
    #[error("rate limited by remote")]
    RateLimited,

    /// Remote returned 401 and the retry-after-refresh also failed
    #[error("unauthenticated")]
    Unauthenticated,

    /// The refresh token itself was rejected by the provider
    #[error("refresh token revoked: {0}")]
    Revoked(String),

    /// Non-2xx from the remote that is not a quota or auth failure
    #[error("upstream error (HTTP {status}): {body}")]
    Upstream {
        /// HTTP status code
        status: u16,
        /// Upstream response body, truncated
        body: String,
    },

    /// Transport-level failure
    #[error("network error: {0}")]
    Network(String),

    /// OAuth flow failure (request build, provider response shape)
    #[error("oauth error: {0}")]
    OAuth(String),

    /// Response body did not decode into the expected shape
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// `true` when a retry at the schedule layer is worthwhile.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::RateLimited => true,
            Error::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Truncate an upstream body for error messages and logs.
pub(crate) fn truncate_body(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
