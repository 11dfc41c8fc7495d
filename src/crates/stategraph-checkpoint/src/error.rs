//! Error types for checkpoint storage backends.

use thiserror::Error;

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors surfaced by checkpoint backends.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Snapshot could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store failed.
    #[error("Storage error: {0}")]
    Storage(String),
}
