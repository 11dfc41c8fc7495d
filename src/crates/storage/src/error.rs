//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors from the durable store or the cache.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Requested row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Payload failed to (de)serialize.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cache backend failed.
    #[error("Cache error: {0}")]
    Cache(String),
}

impl StorageError {
    /// True when the underlying error is a uniqueness violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StorageError::Database(sqlx::Error::Database(db)) => {
                db.message().to_lowercase().contains("unique")
            }
            _ => false,
        }
    }
}
