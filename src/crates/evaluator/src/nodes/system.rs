//! System nodes: failure handling and memory summarization.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use llm::ChatRequest;
use stategraph_core::{ChatMessage, GraphError, Result};

use crate::context::EvaluatorContext;
use crate::state::{token_update, update, SessionState};

const FAILURE_REPLY: &str =
    "I ran into a problem processing your request. Please try again in a moment.";

/// Number of trailing messages kept verbatim when summarizing (two pairs).
const KEEP_VERBATIM: usize = 4;

/// Terminal failure handler.
///
/// Guarantees the caller gets a user-facing reply even when generation
/// failed, and preserves the error fields for the response envelope.
pub async fn handle_failure(_ctx: Arc<EvaluatorContext>, state: Value) -> Result<Value> {
    let s = SessionState::from_value(&state).map_err(|e| GraphError::node("handle_failure", e))?;
    warn!(
        session_id = %s.session_id,
        writer_status = ?s.writer_status,
        error = ?s.error_message,
        "handling failure"
    );

    let mut entries = Vec::new();
    if s.ai_message.as_deref().map(str::trim).unwrap_or("").is_empty() {
        entries.push(("ai_message", json!(FAILURE_REPLY)));
    }
    if s.error_message.is_none() {
        let detail = s
            .writer_error
            .clone()
            .unwrap_or_else(|| "request processing failed".to_string());
        entries.push(("error_message", json!(detail)));
    }
    Ok(update(entries))
}

/// Compress older messages into a running memory summary.
///
/// Keeps the last two turn pairs verbatim and summarizes everything before
/// them. A no-op when the summary already covers the head of the log, so the
/// threshold-retry loop converges.
pub async fn summarize_memory(ctx: Arc<EvaluatorContext>, state: Value) -> Result<Value> {
    let s =
        SessionState::from_value(&state).map_err(|e| GraphError::node("summarize_memory", e))?;

    let head_len = s.messages.len().saturating_sub(KEEP_VERBATIM);
    if head_len == 0 || s.memory_summarized_upto >= head_len {
        info!(
            session_id = %s.session_id,
            head_len,
            summarized_upto = s.memory_summarized_upto,
            "memory already covers the head, skipping"
        );
        return Ok(update(vec![]));
    }

    let excerpt: Vec<String> = s.messages[..head_len]
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect();
    let previous = match &s.memory_summary {
        Some(summary) if !summary.is_empty() => format!("Previous summary:\n{summary}\n"),
        _ => String::new(),
    };

    let system_prompt = ctx
        .prompts
        .render("memory_summary", &[("previous_summary", previous.as_str())])
        .map_err(|e| GraphError::node("summarize_memory", e))?;
    let request = ChatRequest::new(vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(excerpt.join("\n")),
    ]);

    match ctx.chat_model.chat(request).await {
        Ok(response) => {
            info!(
                session_id = %s.session_id,
                summarized = head_len,
                "memory summary refreshed"
            );
            Ok(update(vec![
                ("memory_summary", json!(response.content)),
                ("memory_summarized_upto", json!(head_len)),
                (
                    "chat_tokens",
                    token_update(response.usage.unwrap_or_default()),
                ),
            ]))
        }
        Err(e) => {
            // Best effort: the retry loop re-enters handle_request either way.
            warn!(session_id = %s.session_id, error = %e, "memory summarization failed");
            Ok(update(vec![(
                "error_message",
                json!(format!("memory summarization failed: {e}")),
            )]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::{test_context, test_context_with};
    use llm::testing::MockChatModel;

    #[tokio::test]
    async fn failure_handler_fills_missing_reply() {
        let ctx = test_context().await;
        let state = json!({
            "session_id": "session_1",
            "writer_error": "boom",
        });
        let out = handle_failure(ctx, state).await.unwrap();
        assert_eq!(out["ai_message"], FAILURE_REPLY);
        assert_eq!(out["error_message"], "boom");
    }

    #[tokio::test]
    async fn failure_handler_keeps_existing_reply() {
        let ctx = test_context().await;
        let state = json!({
            "session_id": "session_1",
            "ai_message": "already answered",
            "error_message": "kept",
        });
        let out = handle_failure(ctx, state).await.unwrap();
        assert!(out.get("ai_message").is_none());
        assert!(out.get("error_message").is_none());
    }

    fn long_history(turns: u32) -> Value {
        let mut messages = Vec::new();
        for t in 1..=turns {
            messages.push(json!({"role": "user", "content": format!("q{t}"), "turn": t}));
            messages.push(json!({"role": "assistant", "content": format!("a{t}"), "turn": t}));
        }
        json!(messages)
    }

    #[tokio::test]
    async fn summarize_compresses_head_of_log() {
        let chat = Arc::new(MockChatModel::with_replies(vec![
            "Discussed bitmask DP state design.".into(),
        ]));
        let ctx = test_context_with(chat.clone(), Arc::new(MockChatModel::new())).await;

        let state = json!({
            "session_id": "session_1",
            "messages": long_history(4),
        });
        let out = summarize_memory(ctx, state).await.unwrap();
        assert_eq!(out["memory_summary"], "Discussed bitmask DP state design.");
        assert_eq!(out["memory_summarized_upto"], 4);

        // The excerpt excludes the last two pairs.
        let sent = &chat.recorded_requests()[0].messages[1].content;
        assert!(sent.contains("q1"));
        assert!(!sent.contains("q4"));
    }

    #[tokio::test]
    async fn summarize_is_idempotent_over_covered_head() {
        let chat = Arc::new(MockChatModel::new());
        let ctx = test_context_with(chat.clone(), Arc::new(MockChatModel::new())).await;

        let state = json!({
            "session_id": "session_1",
            "messages": long_history(4),
            "memory_summary": "existing",
            "memory_summarized_upto": 4,
        });
        let out = summarize_memory(ctx, state).await.unwrap();
        assert!(out.as_object().unwrap().is_empty());
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn summarize_short_log_is_noop() {
        let chat = Arc::new(MockChatModel::new());
        let ctx = test_context_with(chat.clone(), Arc::new(MockChatModel::new())).await;
        let state = json!({
            "session_id": "session_1",
            "messages": long_history(2),
        });
        let out = summarize_memory(ctx, state).await.unwrap();
        assert!(out.as_object().unwrap().is_empty());
        assert_eq!(chat.call_count(), 0);
    }
}
