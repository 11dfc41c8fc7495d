//! Provider configuration.

use std::time::Duration;

use crate::error::{LlmError, Result};

/// Configuration for a remote LLM provider.
#[derive(Debug, Clone)]
pub struct RemoteLlmConfig {
    /// API key.
    pub api_key: String,
    /// Base URL of the provider API.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl RemoteLlmConfig {
    /// Build a config with the default 60 s timeout.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Build a config reading the API key from the environment.
    pub fn from_env(env_var: &str, base_url: &str, model: &str) -> Result<Self> {
        let api_key = std::env::var(env_var)
            .map_err(|_| LlmError::ApiKeyNotFound(env_var.to_string()))?;
        Ok(Self::new(api_key, base_url, model))
    }

    /// Override the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
