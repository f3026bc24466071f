//! Storage error types

use thiserror::Error;

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage error type
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Row exists but does not parse into the domain type
    #[error("invalid row: {0}")]
    InvalidRow(String),
    /// Lookup required by the operation found nothing
    #[error("not found: {0}")]
    NotFound(String),
    /// Serialization error for JSON columns
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
