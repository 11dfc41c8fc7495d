//! Main graph wiring.
//!
//! ```text
//! START → handle_request → intent_analyzer
//! intent_analyzer --intent_router--> {writer | handle_failure |
//!     summarize_memory | handle_request | eval_turn_guard}
//! writer --writer_router--> {END | handle_failure | summarize_memory |
//!     handle_request}
//! eval_turn_guard --main_router--> {eval_holistic_flow | handle_request | END}
//! eval_holistic_flow → aggregate_turn_scores → eval_code_performance
//!     → eval_code_correctness → aggregate_final_scores → END
//! handle_failure --main_router--> {eval_holistic_flow | handle_request | END}
//! summarize_memory → handle_request
//! ```

use serde_json::Value;
use std::sync::Arc;

use stategraph_checkpoint::CheckpointSaver;
use stategraph_core::{CompiledGraph, Result, StateGraph, END, START};

use crate::context::EvaluatorContext;
use crate::nodes;
use crate::nodes::turn_eval::TurnEvaluator;
use crate::state::{session_schema, SessionState};

/// Build and compile the main evaluation graph.
pub fn build_main_graph(
    ctx: Arc<EvaluatorContext>,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
) -> Result<CompiledGraph> {
    let turn_evaluator = Arc::new(TurnEvaluator::new(ctx.clone())?);
    let mut graph = StateGraph::with_schema(session_schema());

    macro_rules! node {
        ($name:literal, $f:path) => {{
            let ctx = ctx.clone();
            graph.add_node($name, move |state| $f(ctx.clone(), state));
        }};
    }

    node!("handle_request", nodes::handle_request);
    node!("intent_analyzer", nodes::intent_analyzer);
    node!("writer", nodes::writer);
    node!("handle_failure", nodes::handle_failure);
    node!("summarize_memory", nodes::summarize_memory);
    node!("eval_holistic_flow", nodes::eval_holistic_flow);
    node!("aggregate_turn_scores", nodes::aggregate_turn_scores);
    node!("eval_code_performance", nodes::eval_code_performance);
    node!("eval_code_correctness", nodes::eval_code_correctness);
    node!("aggregate_final_scores", nodes::aggregate_final_scores);

    {
        let ctx = ctx.clone();
        graph.add_node("eval_turn_guard", move |state| {
            nodes::eval_turn_guard(ctx.clone(), turn_evaluator.clone(), state)
        });
    }

    graph.add_edge(START, "handle_request");
    graph.add_edge("handle_request", "intent_analyzer");

    graph.add_conditional_edge(
        "intent_analyzer",
        nodes::intent_router,
        &[
            ("writer", "writer"),
            ("handle_failure", "handle_failure"),
            ("summarize_memory", "summarize_memory"),
            ("handle_request", "handle_request"),
            ("eval_turn_guard", "eval_turn_guard"),
        ],
    );

    graph.add_conditional_edge(
        "writer",
        nodes::writer_router,
        &[
            ("end", END),
            ("handle_failure", "handle_failure"),
            ("summarize_memory", "summarize_memory"),
            ("handle_request", "handle_request"),
        ],
    );

    graph.add_conditional_edge(
        "eval_turn_guard",
        nodes::main_router,
        &[
            ("eval_holistic_flow", "eval_holistic_flow"),
            ("handle_request", "handle_request"),
            ("end", END),
        ],
    );

    graph.add_conditional_edge(
        "handle_failure",
        nodes::main_router,
        &[
            ("eval_holistic_flow", "eval_holistic_flow"),
            ("handle_request", "handle_request"),
            ("end", END),
        ],
    );

    graph.add_edge("summarize_memory", "handle_request");

    graph.add_edge("eval_holistic_flow", "aggregate_turn_scores");
    graph.add_edge("aggregate_turn_scores", "eval_code_performance");
    graph.add_edge("eval_code_performance", "eval_code_correctness");
    graph.add_edge("eval_code_correctness", "aggregate_final_scores");
    graph.add_edge("aggregate_final_scores", END);

    let compiled = graph.compile()?;
    Ok(match checkpointer {
        Some(saver) => compiled.with_checkpointer(saver),
        None => compiled,
    })
}

/// Initial state for a fresh session.
pub fn initial_state(
    session_id: &str,
    exam_id: i64,
    participant_id: i64,
    spec_id: i64,
    human_message: &str,
) -> Value {
    SessionState {
        session_id: session_id.to_string(),
        exam_id,
        participant_id,
        spec_id,
        human_message: human_message.to_string(),
        ..Default::default()
    }
    .to_value()
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Context builders shared by the node tests.

    use std::sync::Arc;
    use std::time::Duration;

    use judge::{JudgeQueue, MemoryQueue};
    use llm::testing::MockChatModel;
    use llm::ChatModel;
    use storage::{MemoryCache, StateRepository};

    use crate::context::EvaluatorContext;
    use crate::problem::ProblemRegistry;
    use crate::prompts::PromptRegistry;

    pub async fn test_context_full(
        chat_model: Arc<dyn ChatModel>,
        eval_model: Arc<dyn ChatModel>,
        queue: Arc<dyn JudgeQueue>,
    ) -> Arc<EvaluatorContext> {
        Arc::new(EvaluatorContext {
            chat_model,
            eval_model,
            prompts: Arc::new(PromptRegistry::embedded()),
            problems: Arc::new(ProblemRegistry::new()),
            state_repo: StateRepository::new(Arc::new(MemoryCache::new())),
            db: None,
            queue,
            queue_poll_interval: Duration::from_millis(10),
            queue_poll_cap: Duration::from_millis(300),
        })
    }

    pub async fn test_context_with(
        chat_model: Arc<dyn ChatModel>,
        eval_model: Arc<dyn ChatModel>,
    ) -> Arc<EvaluatorContext> {
        test_context_full(chat_model, eval_model, Arc::new(MemoryQueue::new())).await
    }

    pub async fn test_context() -> Arc<EvaluatorContext> {
        test_context_with(
            Arc::new(MockChatModel::new()),
            Arc::new(MockChatModel::new()),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::test_context;

    #[tokio::test]
    async fn main_graph_compiles() {
        let ctx = test_context().await;
        assert!(build_main_graph(ctx, None).is_ok());
    }

    #[test]
    fn initial_state_shape() {
        let state = initial_state("session_7", 1, 100, 10, "hello");
        assert_eq!(state["session_id"], "session_7");
        assert_eq!(state["current_turn"], 0);
        assert_eq!(state["human_message"], "hello");
        assert_eq!(state["is_submitted"], false);
        assert_eq!(state["chat_tokens"]["total_tokens"], 0);
    }
}
