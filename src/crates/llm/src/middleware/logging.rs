//! Call logging.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

use crate::error::Result;
use crate::model::{ChatModel, ChatRequest, ChatResponse, ChatStream};

const TRUNCATE_LEN: usize = 100;

/// Logs every call with truncated input/output and elapsed time. Errors are
/// logged with context and re-raised, never swallowed.
pub struct LoggingMiddleware {
    inner: Arc<dyn ChatModel>,
    name: String,
}

impl LoggingMiddleware {
    /// Wrap `inner`; `name` labels the log lines.
    pub fn new(inner: Arc<dyn ChatModel>, name: impl Into<String>) -> Self {
        Self {
            inner,
            name: name.into(),
        }
    }

    fn truncate(text: &str) -> String {
        if text.chars().count() > TRUNCATE_LEN {
            let head: String = text.chars().take(TRUNCATE_LEN).collect();
            format!("{head}...")
        } else {
            text.to_string()
        }
    }

    fn describe_input(request: &ChatRequest) -> String {
        let last = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or("");
        Self::truncate(last)
    }
}

#[async_trait]
impl ChatModel for LoggingMiddleware {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let started = Instant::now();
        debug!(
            chain = %self.name,
            messages = request.messages.len(),
            input = %Self::describe_input(&request),
            "LLM call start"
        );

        match self.inner.chat(request).await {
            Ok(response) => {
                debug!(
                    chain = %self.name,
                    elapsed_s = started.elapsed().as_secs_f64(),
                    output = %Self::truncate(&response.content),
                    total_tokens = response.usage.map(|u| u.total_tokens).unwrap_or(0),
                    "LLM call done"
                );
                Ok(response)
            }
            Err(e) => {
                error!(
                    chain = %self.name,
                    elapsed_s = started.elapsed().as_secs_f64(),
                    error = %e,
                    "LLM call failed"
                );
                Err(e)
            }
        }
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        debug!(
            chain = %self.name,
            messages = request.messages.len(),
            "LLM stream start"
        );
        self.inner.stream(request).await.map_err(|e| {
            error!(chain = %self.name, error = %e, "LLM stream failed to open");
            e
        })
    }
}
