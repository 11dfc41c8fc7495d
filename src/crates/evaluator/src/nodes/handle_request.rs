//! Entry node: advance the turn, clear transient flags, load the problem.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use stategraph_core::{GraphError, Result};

use crate::context::EvaluatorContext;
use crate::state::{update, SessionState};

/// Increment `current_turn`, reset per-request flags, and make sure the
/// problem context is loaded. Submission requests force a reload so the test
/// cases and reference solution are present for grading.
pub async fn handle_request(ctx: Arc<EvaluatorContext>, state: Value) -> Result<Value> {
    let s = SessionState::from_value(&state).map_err(|e| GraphError::node("handle_request", e))?;
    let new_turn = s.current_turn + 1;

    info!(
        session_id = %s.session_id,
        turn = new_turn,
        is_submitted = s.is_submitted,
        "handling request"
    );

    let mut entries = vec![
        ("current_turn", json!(new_turn)),
        ("is_guardrail_failed", json!(false)),
        ("guardrail_message", Value::Null),
        ("writer_status", Value::Null),
        ("writer_error", Value::Null),
        ("error_message", Value::Null),
    ];

    let needs_lookup = s.is_submitted
        || s.problem_context
            .as_ref()
            .map(|p| !p.has_test_cases())
            .unwrap_or(true);
    if needs_lookup && s.spec_id != 0 {
        let context = ctx.problems.resolve(s.spec_id).await;
        info!(
            spec_id = s.spec_id,
            title = %context.basic_info.title,
            test_cases = context.test_cases.len(),
            "problem context loaded"
        );
        let context_value =
            serde_json::to_value(&context).map_err(|e| GraphError::node("handle_request", e))?;
        entries.push(("problem_context", context_value));
    }

    Ok(update(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::test_context;

    #[tokio::test]
    async fn increments_turn_and_clears_flags() {
        let ctx = test_context().await;
        let state = json!({
            "session_id": "session_1",
            "spec_id": 10,
            "current_turn": 2,
            "is_guardrail_failed": true,
            "error_message": "stale",
        });

        let out = handle_request(ctx, state).await.unwrap();
        assert_eq!(out["current_turn"], 3);
        assert_eq!(out["is_guardrail_failed"], false);
        assert!(out["error_message"].is_null());
        assert_eq!(out["problem_context"]["basic_info"]["problem_id"], "2098");
    }

    #[tokio::test]
    async fn submission_forces_problem_reload() {
        let ctx = test_context().await;
        // Context present but without test cases; submission must reload.
        let state = json!({
            "session_id": "session_1",
            "spec_id": 10,
            "current_turn": 4,
            "is_submitted": true,
            "problem_context": {"basic_info": {"problem_id": "2098"}},
        });

        let out = handle_request(ctx, state).await.unwrap();
        assert!(!out["problem_context"]["test_cases"]
            .as_array()
            .unwrap()
            .is_empty());
    }
}
