//! Retry with configurable backoff.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{LlmError, Result};
use crate::model::{ChatModel, ChatRequest, ChatResponse, ChatStream};

/// Backoff growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// `initial * 2^attempt`.
    Exponential,
    /// `initial * (attempt + 1)`.
    Linear,
    /// `initial` every time.
    Fixed,
}

impl BackoffStrategy {
    /// Parse from a config string; unknown values fall back to exponential.
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "linear" => BackoffStrategy::Linear,
            "fixed" => BackoffStrategy::Fixed,
            _ => BackoffStrategy::Exponential,
        }
    }
}

/// Retries transient failures of an inner model.
///
/// An error is retried when [`LlmError::is_retryable`] holds — structurally
/// transient variants, or a lowercased message containing `rate`, `quota`,
/// or `timeout`. On exhaustion the last error is re-raised unchanged.
pub struct RetryMiddleware {
    inner: Arc<dyn ChatModel>,
    max_retries: usize,
    backoff: BackoffStrategy,
    initial_delay: Duration,
    max_delay: Duration,
}

impl RetryMiddleware {
    /// Wrap `inner` with the default budget (3 retries, exponential from 1 s
    /// capped at 60 s).
    pub fn new(inner: Arc<dyn ChatModel>) -> Self {
        Self {
            inner,
            max_retries: 3,
            backoff: BackoffStrategy::Exponential,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff strategy.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set initial and maximum delays.
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Delay before retrying after `attempt` (0-indexed), clamped to the cap.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let raw = match self.backoff {
            BackoffStrategy::Exponential => {
                self.initial_delay.as_secs_f64() * 2f64.powi(attempt as i32)
            }
            BackoffStrategy::Linear => self.initial_delay.as_secs_f64() * (attempt as f64 + 1.0),
            BackoffStrategy::Fixed => self.initial_delay.as_secs_f64(),
        };
        Duration::from_secs_f64(raw.min(self.max_delay.as_secs_f64()))
    }
}

#[async_trait]
impl ChatModel for RetryMiddleware {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.delay_for(attempt - 1);
                warn!(
                    attempt,
                    max_retries = self.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying LLM call after delay"
                );
                sleep(delay).await;
            }

            match self.inner.chat(request.clone()).await {
                Ok(response) => {
                    if attempt > 0 {
                        info!(attempt, "retry succeeded");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if attempt >= self.max_retries || !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        // Loop always returns before falling through with max_retries >= 0;
        // keep the exhaustion path explicit for the zero-budget case.
        Err(last_error
            .unwrap_or_else(|| LlmError::ProviderError("retry budget exhausted".to_string())))
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        // Retry covers establishing the stream; deltas already emitted cannot
        // be replayed, so mid-stream failures propagate.
        let mut last_error: Option<LlmError> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                sleep(self.delay_for(attempt - 1)).await;
            }
            match self.inner.stream(request.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    if attempt >= self.max_retries || !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| LlmError::ProviderError("retry budget exhausted".to_string())))
    }
}
