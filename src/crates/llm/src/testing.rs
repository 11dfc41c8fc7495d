//! Test double for [`ChatModel`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{LlmError, Result};
use crate::model::{ChatModel, ChatRequest, ChatResponse, ChatStream, StreamChunk, TokenUsage};

/// One scripted reply.
pub enum MockReply {
    /// Return this text.
    Text(String),
    /// Fail with this error.
    Error(LlmError),
}

/// Scripted chat model.
///
/// Replies are consumed front to back; when the script is empty the model
/// answers with a fixed default. Every reply reports the same token usage so
/// accounting assertions stay simple. Requests are recorded for inspection.
pub struct MockChatModel {
    script: Mutex<VecDeque<MockReply>>,
    default_reply: String,
    usage: TokenUsage,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl Default for MockChatModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChatModel {
    /// Model that always answers `"ok"`.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_reply: "ok".to_string(),
            usage: TokenUsage::new(10, 5),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Model scripted with text replies.
    pub fn with_replies(replies: Vec<String>) -> Self {
        Self::with_script(replies.into_iter().map(MockReply::Text).collect())
    }

    /// Model scripted with arbitrary replies (text or errors).
    pub fn with_script(script: Vec<MockReply>) -> Self {
        let model = Self::new();
        *model.script.lock() = script.into();
        model
    }

    /// Model whose default reply is a JSON value (handy for structured-output
    /// call sites that run an unknown number of times).
    pub fn answering_json(value: serde_json::Value) -> Self {
        let mut model = Self::new();
        model.default_reply = value.to_string();
        model
    }

    /// Override the per-call usage.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Number of `chat`/`stream` calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Usage reported per successful call.
    pub fn usage_per_call(&self) -> TokenUsage {
        self.usage
    }

    /// Requests seen so far.
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    fn next_reply(&self, request: &ChatRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        match self.script.lock().pop_front() {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Error(err)) => Err(err),
            None => Ok(self.default_reply.clone()),
        }
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let content = self.next_reply(&request)?;
        Ok(ChatResponse {
            content,
            usage: Some(self.usage),
            model: Some("mock".to_string()),
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        let content = self.next_reply(&request)?;
        let usage = self.usage;

        // Word-level deltas; the final chunk carries the usage.
        let words: Vec<String> = content
            .split_inclusive(' ')
            .map(|w| w.to_string())
            .collect();
        let last = words.len().saturating_sub(1);
        let chunks: Vec<Result<StreamChunk>> = words
            .into_iter()
            .enumerate()
            .map(|(i, delta)| {
                Ok(StreamChunk {
                    delta,
                    usage: (i == last).then_some(usage),
                })
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use stategraph_core::ChatMessage;

    #[tokio::test]
    async fn script_then_default() {
        let mock = MockChatModel::with_replies(vec!["first".into()]);
        let req = ChatRequest::new(vec![ChatMessage::user("q")]);
        assert_eq!(mock.chat(req.clone()).await.unwrap().content, "first");
        assert_eq!(mock.chat(req).await.unwrap().content, "ok");
    }

    #[tokio::test]
    async fn stream_reassembles_to_full_content() {
        let mock = MockChatModel::with_replies(vec!["one two three".into()]);
        let mut stream = mock
            .stream(ChatRequest::new(vec![ChatMessage::user("q")]))
            .await
            .unwrap();

        let mut full = String::new();
        let mut final_usage = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            full.push_str(&chunk.delta);
            if chunk.usage.is_some() {
                final_usage = chunk.usage;
            }
        }
        assert_eq!(full, "one two three");
        assert!(final_usage.is_some());
    }
}
