//! Judge subsystem errors.

use thiserror::Error;

/// Result type for judge operations.
pub type Result<T> = std::result::Result<T, JudgeError>;

/// Errors from the queue or the sandbox adapter.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// Queue payload failed to (de)serialize.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Queue backend failed.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Sandbox call failed.
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// HTTP transport failure toward the sandbox.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
