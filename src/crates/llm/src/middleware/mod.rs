//! Middleware pipeline for LLM calls.
//!
//! Each middleware implements [`ChatModel`](crate::ChatModel) over an inner
//! `Arc<dyn ChatModel>`, so wrapping composes. The factory applies the
//! canonical outside-in order:
//!
//! ```text
//! RateLimit -> Retry -> Logging -> model
//! ```
//!
//! Contract shared by all wrappers: calls are never dropped (the rate
//! limiter delays instead), and errors are transparent apart from the retry
//! layer absorbing transient failures up to its budget.

pub mod logging;
pub mod rate_limit;
pub mod retry;

pub use logging::LoggingMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use retry::{BackoffStrategy, RetryMiddleware};

use std::sync::Arc;
use std::time::Duration;

use crate::model::ChatModel;

/// Pipeline settings. The defaults mirror a modest free-tier budget.
#[derive(Debug, Clone)]
pub struct MiddlewareConfig {
    /// Sliding-window call budget.
    pub rate_limit_max_calls: usize,
    /// Sliding-window period.
    pub rate_limit_period: Duration,
    /// Retry attempts after the initial call.
    pub retry_max_retries: usize,
    /// First backoff delay.
    pub retry_initial_delay: Duration,
    /// Backoff delay cap.
    pub retry_max_delay: Duration,
    /// Backoff growth strategy.
    pub backoff: BackoffStrategy,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            rate_limit_max_calls: 15,
            rate_limit_period: Duration::from_secs(60),
            retry_max_retries: 3,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            backoff: BackoffStrategy::Exponential,
        }
    }
}

/// Wrap a model with the full pipeline. `name` labels the log lines.
pub fn wrap_chat_model(
    model: Arc<dyn ChatModel>,
    name: &str,
    config: &MiddlewareConfig,
) -> Arc<dyn ChatModel> {
    let logged = Arc::new(LoggingMiddleware::new(model, name));
    let retried = Arc::new(
        RetryMiddleware::new(logged)
            .with_max_retries(config.retry_max_retries)
            .with_backoff(config.backoff)
            .with_delays(config.retry_initial_delay, config.retry_max_delay),
    );
    Arc::new(RateLimitMiddleware::new(
        retried,
        config.rate_limit_max_calls,
        config.rate_limit_period,
    ))
}
