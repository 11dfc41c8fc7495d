//! Sliding-window rate limiter.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::model::{ChatModel, ChatRequest, ChatResponse, ChatStream};

/// Derives the rate-limit bucket key from a request. `None` means one global
/// bucket.
pub type KeyFn = Arc<dyn Fn(&ChatRequest) -> String + Send + Sync>;

/// Sliding-window rate limiting over an inner model.
///
/// Tracks call timestamps per key in a window of `period`. When the window
/// is full the caller sleeps until the oldest call expires, then proceeds —
/// calls are delayed, never dropped.
pub struct RateLimitMiddleware {
    inner: Arc<dyn ChatModel>,
    max_calls: usize,
    period: Duration,
    key_fn: Option<KeyFn>,
    history: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimitMiddleware {
    /// Limit `inner` to `max_calls` per `period` globally.
    pub fn new(inner: Arc<dyn ChatModel>, max_calls: usize, period: Duration) -> Self {
        Self {
            inner,
            max_calls,
            period,
            key_fn: None,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Partition the window by a per-request key.
    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = Some(key_fn);
        self
    }

    fn key_for(&self, request: &ChatRequest) -> String {
        match &self.key_fn {
            Some(f) => f(request),
            None => "global".to_string(),
        }
    }

    /// Reserve a slot in the window, sleeping while it is full.
    async fn acquire(&self, key: &str) {
        loop {
            let wait = {
                let mut history = self.history.lock().await;
                let now = Instant::now();
                let window = history.entry(key.to_string()).or_default();
                window.retain(|t| now.duration_since(*t) < self.period);

                if window.len() < self.max_calls {
                    window.push(now);
                    None
                } else {
                    // Oldest entry bounds how long until a slot frees up.
                    let oldest = *window.iter().min().unwrap_or(&now);
                    Some(self.period.saturating_sub(now.duration_since(oldest)))
                }
            };

            match wait {
                None => return,
                Some(wait) => {
                    warn!(
                        key = %key,
                        wait_ms = wait.as_millis() as u64,
                        "rate limit window full, delaying call"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Calls currently counted in the window for a key.
    pub async fn window_len(&self, key: &str) -> usize {
        let mut history = self.history.lock().await;
        let now = Instant::now();
        let window = history.entry(key.to_string()).or_default();
        window.retain(|t| now.duration_since(*t) < self.period);
        window.len()
    }
}

#[async_trait]
impl ChatModel for RateLimitMiddleware {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let key = self.key_for(&request);
        self.acquire(&key).await;
        self.inner.chat(request).await
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        let key = self.key_for(&request);
        self.acquire(&key).await;
        self.inner.stream(request).await
    }
}
