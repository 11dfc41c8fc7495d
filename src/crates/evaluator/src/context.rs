//! Shared dependencies handed to every node.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use judge::JudgeQueue;
use llm::ChatModel;
use storage::{Database, EvaluationRepository, EvaluationType, StateRepository};

use crate::problem::ProblemRegistry;
use crate::prompts::PromptRegistry;

/// Node dependencies: models, registries, cache, durable store, queue.
///
/// The two model handles are middleware-wrapped upstream; `chat_model` feeds
/// the `chat_tokens` counter, `eval_model` the `eval_tokens` counter.
pub struct EvaluatorContext {
    /// Model for the chat path (intent layer 2, writer, memory summary).
    pub chat_model: Arc<dyn ChatModel>,
    /// Model for the evaluation path (turn and holistic evaluators).
    pub eval_model: Arc<dyn ChatModel>,
    /// Prompt templates.
    pub prompts: Arc<PromptRegistry>,
    /// Problem resolution.
    pub problems: Arc<ProblemRegistry>,
    /// Live-state cache repository.
    pub state_repo: StateRepository,
    /// Durable store for evaluation records; absent in lightweight tests.
    pub db: Option<Database>,
    /// Execution queue for code grading.
    pub queue: Arc<dyn JudgeQueue>,
    /// Poll interval while waiting for an execution result.
    pub queue_poll_interval: Duration,
    /// Overall cap on waiting for an execution result.
    pub queue_poll_cap: Duration,
}

impl EvaluatorContext {
    /// Numeric session id behind a `session_{id}` cache key, when it parses.
    pub fn numeric_session_id(session_id: &str) -> Option<i64> {
        session_id
            .strip_prefix("session_")
            .unwrap_or(session_id)
            .parse()
            .ok()
    }

    /// Persist an evaluation record durably. Failures are logged and
    /// swallowed: evaluation persistence never blocks the flow that
    /// triggered it.
    pub async fn persist_evaluation(
        &self,
        session_id: &str,
        turn: Option<i64>,
        evaluation_type: EvaluationType,
        node_name: &str,
        score: Option<f64>,
        analysis: Option<&str>,
        details: Option<&serde_json::Value>,
    ) {
        let Some(db) = &self.db else {
            return;
        };
        let Some(numeric_id) = Self::numeric_session_id(session_id) else {
            warn!(session_id = %session_id, "session id is not numeric, skipping durable evaluation");
            return;
        };
        if let Err(e) = EvaluationRepository::upsert(
            db.pool(),
            numeric_id,
            turn,
            evaluation_type,
            Some(node_name),
            score,
            analysis,
            details,
        )
        .await
        {
            warn!(
                session_id = %session_id,
                turn = ?turn,
                error = %e,
                "durable evaluation write failed (continuing)"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_session_id_parses_both_forms() {
        assert_eq!(EvaluatorContext::numeric_session_id("session_42"), Some(42));
        assert_eq!(EvaluatorContext::numeric_session_id("42"), Some(42));
        assert_eq!(EvaluatorContext::numeric_session_id("abc"), None);
    }
}
