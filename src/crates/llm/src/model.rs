//! Chat model trait and request/response types.

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::pin::Pin;

use stategraph_core::ChatMessage;

use crate::error::Result;

/// Token usage reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u64,
    /// Tokens produced in the completion.
    pub completion_tokens: u64,
    /// Provider-reported total.
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Usage with the total derived from the two components.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// True when every component is zero.
    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// A chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Conversation so far, system message first.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Completion token cap.
    pub max_output_tokens: Option<u32>,
}

impl ChatRequest {
    /// Request over the given messages with provider defaults.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_output_tokens: None,
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Cap the completion length.
    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }
}

/// A complete chat response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Assistant reply text.
    pub content: String,
    /// Token usage, when the provider reports it.
    pub usage: Option<TokenUsage>,
    /// Model identifier, when reported.
    pub model: Option<String>,
}

/// One streamed delta. The final chunk of a stream carries the usage.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// Text delta to append.
    pub delta: String,
    /// Usage totals; present on the last chunk only.
    pub usage: Option<TokenUsage>,
}

/// Token-by-token response stream.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Chat-based language model.
///
/// Implementations must be `Send + Sync`; call sites share them as
/// `Arc<dyn ChatModel>` so middleware can wrap any inner model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a complete response.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Stream a response token by token.
    ///
    /// The default implementation degrades to a single chunk containing the
    /// whole completion, which keeps non-streaming providers usable behind
    /// the streaming surface.
    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        let response = self.chat(request).await?;
        let chunk = StreamChunk {
            delta: response.content,
            usage: response.usage,
        };
        Ok(Box::pin(futures::stream::iter([Ok(chunk)])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage::new(10, 5);
        total += TokenUsage::new(3, 2);
        assert_eq!(total.prompt_tokens, 13);
        assert_eq!(total.completion_tokens, 7);
        assert_eq!(total.total_tokens, 20);
    }

    #[test]
    fn request_builder() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")])
            .with_temperature(0.3)
            .with_max_output_tokens(1024);
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.max_output_tokens, Some(1024));
    }
}
