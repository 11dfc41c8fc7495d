//! Submission-time batch evaluator (the evaluation guard).
//!
//! Chat-path turns are not evaluated eagerly, so on submission this node
//! guarantees every prior turn has a TurnLog before the holistic evaluator
//! runs. Turns are reconstructed from two redundant sources — the cached
//! turn→message-index mapping written by the writer, and the per-envelope
//! turn tags — and evaluated in parallel under a five-permit semaphore.
//! A single turn failing becomes a score-0 TurnLog; it never blocks the
//! holistic evaluation.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use llm::TokenUsage;
use stategraph_core::{GraphError, Result};
use storage::EvaluationType;

use crate::context::EvaluatorContext;
use crate::nodes::turn_eval::{TurnEvalInput, TurnEvaluator};
use crate::state::{token_update, update, SessionState};

const MAX_CONCURRENT_EVALUATIONS: usize = 5;

/// Recover the `(user, ai)` contents of a turn: mapping first, tag scan as
/// the fallback.
fn reconstruct_turn(
    s: &SessionState,
    mapping: &BTreeMap<u32, (usize, usize)>,
    turn: u32,
) -> (Option<String>, Option<String>) {
    if let Some(&(start, end)) = mapping.get(&turn) {
        if start < s.messages.len() && end < s.messages.len() {
            return (
                Some(s.messages[start].content.clone()),
                Some(s.messages[end].content.clone()),
            );
        }
        warn!(
            turn,
            start,
            end,
            messages = s.messages.len(),
            "turn mapping indices out of range, falling back to tag scan"
        );
    }
    s.find_turn_pair(turn)
}

fn zero_score_log(turn: u32, reason: &str) -> Value {
    json!({
        "turn": turn,
        "intent": "HINT_OR_QUERY",
        "intent_confidence": 0.0,
        "is_guardrail_failed": false,
        "user_prompt_summary": "",
        "rubrics": [],
        "final_reasoning": reason,
        "turn_score": 0.0,
        "ai_answer_summary": null,
        "evaluated_at": Utc::now().to_rfc3339(),
    })
}

/// Evaluate every prior turn of the session (`1..current_turn`).
pub async fn eval_turn_guard(
    ctx: Arc<EvaluatorContext>,
    evaluator: Arc<TurnEvaluator>,
    state: Value,
) -> Result<Value> {
    let s = SessionState::from_value(&state).map_err(|e| GraphError::node("eval_turn_guard", e))?;
    // The submission turn itself is not a prompt-quality turn.
    let turns: Vec<u32> = (1..s.current_turn).collect();

    info!(
        session_id = %s.session_id,
        current_turn = s.current_turn,
        turns = turns.len(),
        "evaluation guard entered"
    );

    if turns.is_empty() {
        return Ok(update(vec![("turn_scores", json!({}))]));
    }

    let mapping = match ctx.state_repo.get_turn_mapping(&s.session_id).await {
        Ok(mapping) => mapping,
        Err(e) => {
            warn!(session_id = %s.session_id, error = %e, "turn mapping unavailable, using tag scan only");
            BTreeMap::new()
        }
    };

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_EVALUATIONS));
    let mut handles = Vec::with_capacity(turns.len());
    let mut turn_scores = Map::new();
    let mut turn_evaluations = Map::new();

    for turn in turns {
        // Guardrail-blocked turns already carry their zero log; keep it
        // instead of re-grading a refusal exchange.
        if let Ok(Some(existing)) = ctx.state_repo.get_turn_log(&s.session_id, turn).await {
            if existing["is_guardrail_failed"].as_bool().unwrap_or(false) {
                turn_scores.insert(turn.to_string(), json!({"turn_score": 0.0}));
                turn_evaluations.insert(
                    turn.to_string(),
                    json!({
                        "final_reasoning": existing["final_reasoning"],
                        "rubrics": existing["rubrics"],
                    }),
                );
                continue;
            }
        }
        let (user, ai) = reconstruct_turn(&s, &mapping, turn);
        let previous_context = if turn > 1 {
            reconstruct_turn(&s, &mapping, turn - 1).1
        } else {
            None
        };

        let evaluator = evaluator.clone();
        let semaphore = semaphore.clone();
        let session_id = s.session_id.clone();
        let problem_context = s.problem_context.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore never closed");

            let (Some(user), Some(ai)) = (user, ai) else {
                return (turn, Err("turn messages could not be reconstructed".to_string()));
            };

            let input = TurnEvalInput {
                session_id,
                turn,
                human_message: user,
                ai_message: ai,
                previous_context,
                problem_context,
                is_guardrail_failed: false,
                guardrail_message: None,
            };
            match evaluator.evaluate(input).await {
                Ok(evaluation) => (turn, Ok(evaluation)),
                Err(e) => (turn, Err(e.to_string())),
            }
        }));
    }

    let mut eval_tokens = TokenUsage::default();

    for handle in handles {
        let (turn, outcome) = handle
            .await
            .map_err(|e| GraphError::node("eval_turn_guard", e))?;
        match outcome {
            Ok(evaluation) => {
                turn_scores.insert(
                    turn.to_string(),
                    json!({"turn_score": evaluation.turn_score}),
                );
                turn_evaluations.insert(
                    turn.to_string(),
                    json!({
                        "final_reasoning": evaluation.final_reasoning,
                        "rubrics": evaluation.rubrics,
                    }),
                );
                eval_tokens += evaluation.eval_tokens;
            }
            Err(reason) => {
                // Swallowed into a zero-score log; holistic evaluation
                // proceeds over the remaining turns.
                warn!(session_id = %s.session_id, turn, reason = %reason, "turn evaluation failed");
                let log = zero_score_log(turn, &format!("evaluation failed: {reason}"));
                if let Err(e) = ctx.state_repo.save_turn_log(&s.session_id, turn, &log).await {
                    warn!(session_id = %s.session_id, turn, error = %e, "zero-score log write failed");
                }
                ctx.persist_evaluation(
                    &s.session_id,
                    Some(turn as i64),
                    EvaluationType::TurnEval,
                    "eval_turn_guard",
                    Some(0.0),
                    Some(&format!("evaluation failed: {reason}")),
                    Some(&log),
                )
                .await;
                turn_scores.insert(turn.to_string(), json!({"turn_score": 0.0}));
                turn_evaluations.insert(
                    turn.to_string(),
                    json!({
                        "final_reasoning": format!("evaluation failed: {reason}"),
                        "rubrics": [],
                    }),
                );
            }
        }
    }

    info!(
        session_id = %s.session_id,
        evaluated = turn_scores.len(),
        "evaluation guard done"
    );

    Ok(update(vec![
        ("turn_scores", Value::Object(turn_scores)),
        ("turn_evaluations", Value::Object(turn_evaluations)),
        ("eval_tokens", token_update(eval_tokens)),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::test_context_with;
    use llm::testing::MockChatModel;

    fn submit_state(turns: u32) -> Value {
        let mut messages = Vec::new();
        for t in 1..=turns {
            messages.push(json!({"role": "user", "content": format!("question {t}"), "turn": t}));
            messages.push(json!({"role": "assistant", "content": format!("answer {t}"), "turn": t}));
        }
        json!({
            "session_id": "session_1",
            "spec_id": 10,
            "current_turn": turns + 1,
            "is_submitted": true,
            "messages": messages,
        })
    }

    fn always_good_eval() -> Arc<MockChatModel> {
        // One union-shaped default answers every structured call: the intent
        // parser reads intent_types, the rubric parser reads rubrics.
        Arc::new(MockChatModel::answering_json(json!({
            "intent_types": ["HINT_OR_QUERY"],
            "confidence": 0.8,
            "rubrics": [
                {"name": "Clarity", "score": 70.0, "reasoning": "ok"},
                {"name": "Problem Relevance", "score": 70.0, "reasoning": "ok"},
                {"name": "Context Use", "score": 70.0, "reasoning": "ok"},
                {"name": "Specificity", "score": 70.0, "reasoning": "ok"},
            ],
            "final_reasoning": "consistent quality"
        })))
    }

    #[tokio::test]
    async fn evaluates_every_prior_turn() {
        // E4 shape: three chat turns, then submission on turn 4.
        let ctx = test_context_with(Arc::new(MockChatModel::new()), always_good_eval()).await;
        let evaluator = Arc::new(TurnEvaluator::new(ctx.clone()).unwrap());

        let out = eval_turn_guard(ctx.clone(), evaluator, submit_state(3))
            .await
            .unwrap();

        let scores = out["turn_scores"].as_object().unwrap();
        assert_eq!(scores.len(), 3);
        for turn in ["1", "2", "3"] {
            assert_eq!(scores[turn]["turn_score"], 70.0);
            assert!(out["turn_evaluations"][turn]["final_reasoning"].is_string());
        }
        assert!(out["eval_tokens"]["total_tokens"].as_u64().unwrap() > 0);

        // Logs landed in the cache for the holistic evaluator.
        let logs = ctx.state_repo.get_all_turn_logs("session_1").await.unwrap();
        assert_eq!(logs.len(), 3);
    }

    #[tokio::test]
    async fn first_submission_with_no_turns_is_empty() {
        let ctx = test_context_with(Arc::new(MockChatModel::new()), always_good_eval()).await;
        let evaluator = Arc::new(TurnEvaluator::new(ctx.clone()).unwrap());

        let out = eval_turn_guard(ctx, evaluator, submit_state(0)).await.unwrap();
        assert!(out["turn_scores"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_turn_messages_become_zero_score() {
        let ctx = test_context_with(Arc::new(MockChatModel::new()), always_good_eval()).await;
        let evaluator = Arc::new(TurnEvaluator::new(ctx.clone()).unwrap());

        // Turn 2's messages are absent from the log.
        let mut state = submit_state(3);
        let messages: Vec<Value> = state["messages"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|m| m["turn"] != 2)
            .cloned()
            .collect();
        state["messages"] = json!(messages);

        let out = eval_turn_guard(ctx, evaluator, state).await.unwrap();
        assert_eq!(out["turn_scores"]["2"]["turn_score"], 0.0);
        assert_eq!(out["turn_scores"]["1"]["turn_score"], 70.0);
        assert!(out["turn_evaluations"]["2"]["final_reasoning"]
            .as_str()
            .unwrap()
            .contains("evaluation failed"));
    }

    #[tokio::test]
    async fn turn_mapping_takes_precedence_over_tags() {
        let ctx = test_context_with(Arc::new(MockChatModel::new()), always_good_eval()).await;
        let evaluator = Arc::new(TurnEvaluator::new(ctx.clone()).unwrap());

        // Mapping points turn 1 at indices (0, 1) even though tags are absent.
        ctx.state_repo
            .save_turn_mapping("session_1", 1, 0, 1)
            .await
            .unwrap();
        let state = json!({
            "session_id": "session_1",
            "current_turn": 2,
            "is_submitted": true,
            "messages": [
                {"role": "user", "content": "untagged question"},
                {"role": "assistant", "content": "untagged answer"},
            ],
        });

        let out = eval_turn_guard(ctx, evaluator, state).await.unwrap();
        assert_eq!(out["turn_scores"]["1"]["turn_score"], 70.0);
    }
}
