//! Error types for feedmill-summarize

use thiserror::Error;

/// Summarizer layer error type
#[derive(Debug, Error)]
pub enum Error {
    /// Non-2xx from the pre-processor
    #[error("pre-processor error (HTTP {status}): {body}")]
    Upstream {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },

    /// Transport-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Response body did not decode into the expected shape
    #[error("decode error: {0}")]
    Decode(String),

    /// The stream was canceled before completion
    #[error("stream canceled")]
    Canceled,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
