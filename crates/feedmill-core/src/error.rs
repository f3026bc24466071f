//! Core error taxonomy
//!
//! One enum spanning the whole orchestration layer. Transport and
//! storage errors from the leaf crates are folded into it so the API
//! layer maps a single type onto response statuses.

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed request (empty required field, bad cursor, bad URL)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing/invalid/expired credential
    #[error("unauthenticated")]
    Unauthenticated,

    /// A lookup the operation requires found nothing
    #[error("not found: {0}")]
    NotFound(String),

    /// Remote 429 or the local safety buffer
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Non-2xx from a remote
    #[error("upstream error (HTTP {status}): {body}")]
    Upstream {
        /// HTTP status code
        status: u16,
        /// Upstream body, truncated
        body: String,
    },

    /// Storage failures, decode failures, everything unexpected
    #[error("internal error: {0}")]
    Internal(String),

    /// The operation was canceled; never counted as a failure
    #[error("canceled")]
    Canceled,
}

impl From<feedmill_storage::StorageError> for CoreError {
    fn from(err: feedmill_storage::StorageError) -> Self {
        match err {
            feedmill_storage::StorageError::NotFound(what) => CoreError::NotFound(what),
            other => CoreError::Internal(other.to_string()),
        }
    }
}

impl From<feedmill_inoreader::Error> for CoreError {
    fn from(err: feedmill_inoreader::Error) -> Self {
        use feedmill_inoreader::Error as ApiError;
        match err {
            ApiError::QuotaExceeded { zone, reason } => {
                CoreError::RateLimited(format!("{zone}: {reason}"))
            }
            ApiError::RateLimited => CoreError::RateLimited("remote returned 429".to_string()),
            ApiError::Unauthenticated | ApiError::Revoked(_) => CoreError::Unauthenticated,
            ApiError::Upstream { status, body } => CoreError::Upstream { status, body },
            other => CoreError::Internal(other.to_string()),
        }
    }
}

impl From<feedmill_summarize::Error> for CoreError {
    fn from(err: feedmill_summarize::Error) -> Self {
        use feedmill_summarize::Error as SummarizeError;
        match err {
            SummarizeError::Upstream { status, body } => CoreError::Upstream { status, body },
            SummarizeError::Canceled => CoreError::Canceled,
            other => CoreError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_errors_map_to_rate_limited() {
        let err: CoreError = feedmill_inoreader::Error::RateLimited.into();
        assert!(matches!(err, CoreError::RateLimited(_)));
    }

    #[test]
    fn test_storage_not_found_is_preserved() {
        let err: CoreError =
            feedmill_storage::StorageError::NotFound("article x".to_string()).into();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_summarize_cancel_maps_to_canceled() {
        let err: CoreError = feedmill_summarize::Error::Canceled.into();
        assert!(matches!(err, CoreError::Canceled));
    }
}
