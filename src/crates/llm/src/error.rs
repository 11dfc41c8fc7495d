//! Error types for LLM gateway operations.

use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when talking to an LLM provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to serialize/deserialize provider payloads.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// API key not found in the environment.
    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),

    /// Rate limit or quota exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Request timed out.
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Prompt exceeded the model's context window.
    #[error("Context length exceeded: {0}")]
    ContextOverflow(String),

    /// Provider service unavailable.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Provider returned a response the gateway could not use.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// General provider error.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LlmError {
    /// Whether the retry middleware should consider this error transient.
    ///
    /// Structural retryability first; otherwise fall back to the lowercased
    /// message containing one of `rate`, `quota`, `timeout`.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(_)
            | LlmError::ServiceUnavailable(_)
            | LlmError::Timeout(_)
            | LlmError::RateLimitExceeded(_) => true,
            other => {
                let msg = other.to_string().to_lowercase();
                msg.contains("rate") || msg.contains("quota") || msg.contains("timeout")
            }
        }
    }

    /// Whether this error is a rate/quota limit.
    pub fn is_rate_limited(&self) -> bool {
        if matches!(self, LlmError::RateLimitExceeded(_)) {
            return true;
        }
        let msg = self.to_string().to_lowercase();
        msg.contains("rate") || msg.contains("quota")
    }

    /// Whether this error means the prompt overflowed the context window.
    pub fn is_context_overflow(&self) -> bool {
        if matches!(self, LlmError::ContextOverflow(_)) {
            return true;
        }
        let msg = self.to_string().to_lowercase();
        msg.contains("context") || msg.contains("token")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_retryable() {
        assert!(LlmError::RateLimitExceeded("429".into()).is_retryable());
        assert!(LlmError::Timeout("deadline".into()).is_retryable());
        assert!(!LlmError::InvalidRequest("bad".into()).is_retryable());
    }

    #[test]
    fn message_based_retry_classification() {
        // Errors whose message mentions quota are retryable even when the
        // variant itself is not structurally transient.
        assert!(LlmError::ProviderError("quota exhausted for project".into()).is_retryable());
        assert!(!LlmError::ProviderError("model rejected input".into()).is_retryable());
    }

    #[test]
    fn failure_taxonomy_helpers() {
        assert!(LlmError::ProviderError("resource quota hit".into()).is_rate_limited());
        assert!(LlmError::ProviderError("input token budget exceeded".into())
            .is_context_overflow());
        assert!(!LlmError::InvalidRequest("missing field".into()).is_rate_limited());
    }
}
