//! Holistic evaluators: chaining flow, turn-score aggregation, code
//! execution, and the final score.
//!
//! The sandbox runs once, in `eval_code_performance`; its outcome is stored
//! in `code_execution` and `eval_code_correctness` reads it. When the queue
//! times out or the sandbox fails, both scores fall back to an LLM-judged
//! code-quality rubric and the result carries a `skip_reason`.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use judge::{JudgeStatus, JudgeTask, JudgeTestCase, TaskStatus};
use llm::{chat_structured, ChatRequest, TokenUsage};
use stategraph_core::{ChatMessage, GraphError, Result};
use storage::EvaluationType;

use crate::context::EvaluatorContext;
use crate::state::{token_update, update, CodeExecution, FinalScores, SessionState};

/// Structured output of the chaining-flow judge.
#[derive(Debug, Deserialize)]
struct HolisticFlowEvaluation {
    overall_flow_score: f64,
    #[serde(default)]
    problem_decomposition: f64,
    #[serde(default)]
    feedback_integration: f64,
    #[serde(default)]
    strategic_exploration: f64,
    #[serde(default)]
    analysis: String,
}

/// Structured output of the code-quality fallback judge.
#[derive(Debug, Deserialize)]
struct CodeQualityEvaluation {
    #[serde(default)]
    correctness: f64,
    #[serde(default)]
    efficiency: f64,
    #[serde(default)]
    readability: f64,
    #[serde(default)]
    best_practices: f64,
}

fn clamp(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 6a: cross-turn chaining evaluation over the structured turn logs.
pub async fn eval_holistic_flow(ctx: Arc<EvaluatorContext>, state: Value) -> Result<Value> {
    let s =
        SessionState::from_value(&state).map_err(|e| GraphError::node("eval_holistic_flow", e))?;

    let turn_logs = match ctx.state_repo.get_all_turn_logs(&s.session_id).await {
        Ok(logs) => logs,
        Err(e) => {
            warn!(session_id = %s.session_id, error = %e, "turn logs unavailable from cache");
            Default::default()
        }
    };

    let structured_logs: Vec<Value> = if !turn_logs.is_empty() {
        turn_logs
            .iter()
            .map(|(turn, log)| {
                json!({
                    "turn": turn,
                    "intent": log["intent"],
                    "prompt_summary": log["user_prompt_summary"],
                    "llm_reasoning": log["final_reasoning"],
                    "ai_summary": log["ai_answer_summary"],
                    "score": log["turn_score"],
                    "rubrics": log["rubrics"],
                })
            })
            .collect()
    } else {
        // Cache miss: rebuild a thinner view from the state's own maps.
        s.turn_scores
            .iter()
            .map(|(turn, score)| {
                let evaluation = s.turn_evaluations.get(turn).cloned().unwrap_or(Value::Null);
                json!({
                    "turn": turn,
                    "intent": Value::Null,
                    "prompt_summary": "",
                    "llm_reasoning": evaluation["final_reasoning"],
                    "ai_summary": Value::Null,
                    "score": score["turn_score"],
                    "rubrics": evaluation["rubrics"],
                })
            })
            .collect()
    };

    if structured_logs.is_empty() {
        warn!(session_id = %s.session_id, "no turn logs to evaluate");
        return Ok(update(vec![("holistic_flow_score", json!(0.0))]));
    }

    let (info_section, roadmap_section) =
        crate::nodes::writer::problem_sections(s.problem_context.as_ref());
    let system_prompt = ctx
        .prompts
        .render(
            "holistic_flow",
            &[
                ("problem_info_section", info_section.as_str()),
                ("hint_roadmap_section", roadmap_section.as_str()),
            ],
        )
        .map_err(|e| GraphError::node("eval_holistic_flow", e))?;

    let logs_json = serde_json::to_string_pretty(&structured_logs)
        .map_err(|e| GraphError::node("eval_holistic_flow", e))?;
    let request = ChatRequest::new(vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(format!(
            "Per-turn conversation logs:\n\n{logs_json}\n\nEvaluate the chaining strategy."
        )),
    ])
    .with_temperature(0.1);

    match chat_structured::<HolisticFlowEvaluation>(ctx.eval_model.as_ref(), request).await {
        Ok((evaluation, usage)) => {
            let score = clamp(evaluation.overall_flow_score);
            info!(session_id = %s.session_id, score, "holistic flow evaluated");
            ctx.persist_evaluation(
                &s.session_id,
                None,
                EvaluationType::HolisticFlow,
                "eval_holistic_flow",
                Some(score),
                Some(&evaluation.analysis),
                Some(&json!({
                    "problem_decomposition": clamp(evaluation.problem_decomposition),
                    "feedback_integration": clamp(evaluation.feedback_integration),
                    "strategic_exploration": clamp(evaluation.strategic_exploration),
                })),
            )
            .await;
            Ok(update(vec![
                ("holistic_flow_score", json!(score)),
                ("holistic_flow_analysis", json!(evaluation.analysis)),
                ("eval_tokens", token_update(usage)),
            ]))
        }
        Err(e) => {
            warn!(session_id = %s.session_id, error = %e, "holistic flow evaluation failed");
            Ok(update(vec![
                ("holistic_flow_score", Value::Null),
                (
                    "error_message",
                    json!(format!("holistic flow evaluation failed: {e}")),
                ),
            ]))
        }
    }
}

/// 6b: mean of the evaluated turn scores.
pub async fn aggregate_turn_scores(_ctx: Arc<EvaluatorContext>, state: Value) -> Result<Value> {
    let s = SessionState::from_value(&state)
        .map_err(|e| GraphError::node("aggregate_turn_scores", e))?;

    let scores: Vec<f64> = s
        .turn_scores
        .values()
        .filter_map(|entry| entry.get("turn_score").and_then(Value::as_f64))
        .collect();

    if scores.is_empty() {
        warn!(session_id = %s.session_id, "no turn scores to aggregate");
        return Ok(update(vec![("aggregate_turn_score", Value::Null)]));
    }

    let mean = round2(scores.iter().sum::<f64>() / scores.len() as f64);
    info!(session_id = %s.session_id, turns = scores.len(), mean, "turn scores aggregated");
    Ok(update(vec![("aggregate_turn_score", json!(mean))]))
}

/// LLM-judged code score used when sandboxed execution is unavailable.
///
/// Correctness focus weights 0.7/0.2/0.1 (correctness, efficiency, best
/// practices); performance focus weights 0.6/0.2/0.2 (efficiency,
/// correctness, best practices).
async fn llm_code_score(
    ctx: &EvaluatorContext,
    code: &str,
    focus: &str,
) -> std::result::Result<(f64, TokenUsage), llm::LlmError> {
    let system_prompt = ctx
        .prompts
        .render("code_quality", &[("focus", focus)])
        .map_err(|e| llm::LlmError::ConfigError(e.to_string()))?;
    let request = ChatRequest::new(vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(format!("Code:\n```\n{code}\n```")),
    ])
    .with_temperature(0.1);

    let (quality, usage) =
        chat_structured::<CodeQualityEvaluation>(ctx.eval_model.as_ref(), request).await?;
    let score = match focus {
        "performance" => {
            clamp(quality.efficiency) * 0.6
                + clamp(quality.correctness) * 0.2
                + clamp(quality.best_practices) * 0.2
        }
        _ => {
            clamp(quality.correctness) * 0.7
                + clamp(quality.efficiency) * 0.2
                + clamp(quality.best_practices) * 0.1
        }
    };
    // Readability is collected for the record but does not enter the score.
    let _ = quality.readability;
    Ok((round2(score), usage))
}

/// Run the submission through the judge queue and wait for the result.
/// `None` means the poll cap expired or the queue failed.
async fn run_code_execution(
    ctx: &EvaluatorContext,
    s: &SessionState,
) -> Option<judge::JudgeResult> {
    let problem = s.problem_context.as_ref()?;
    if !problem.has_test_cases() {
        warn!(session_id = %s.session_id, "no test cases available for execution");
        return None;
    }

    let test_cases: Vec<JudgeTestCase> = problem
        .test_cases
        .iter()
        .map(|tc| JudgeTestCase {
            input: tc.input.clone(),
            expected: tc.expected.clone(),
        })
        .collect();
    let cpu_limit = problem.constraints.time_limit_sec.ceil().max(1.0) as u32;
    let memory_limit = if problem.constraints.memory_limit_mb > 0 {
        problem.constraints.memory_limit_mb
    } else {
        128
    };

    let task = JudgeTask::new(
        s.code_content.clone().unwrap_or_default(),
        s.code_language.clone().unwrap_or_else(|| "python".to_string()),
        test_cases,
    )
    .with_limits(cpu_limit, memory_limit)
    .with_meta(json!({"session_id": s.session_id}));

    let task_id = match ctx.queue.enqueue(task).await {
        Ok(task_id) => task_id,
        Err(e) => {
            warn!(session_id = %s.session_id, error = %e, "judge enqueue failed");
            return None;
        }
    };

    info!(session_id = %s.session_id, task_id = %task_id, "judge task enqueued");
    let started = Instant::now();
    loop {
        match ctx.queue.get_status(&task_id).await {
            Ok(status) if status.is_terminal() => {
                return match ctx.queue.get_result(&task_id).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(task_id = %task_id, error = %e, "judge result read failed");
                        None
                    }
                };
            }
            Ok(TaskStatus::Unknown) => {
                warn!(task_id = %task_id, "judge task vanished from the queue");
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "judge status poll failed");
                return None;
            }
        }
        if started.elapsed() >= ctx.queue_poll_cap {
            warn!(task_id = %task_id, "judge poll cap expired");
            return None;
        }
        tokio::time::sleep(ctx.queue_poll_interval).await;
    }
}

fn execution_outcome(result: &judge::JudgeResult) -> CodeExecution {
    let (passed, total) = if !result.cases.is_empty() {
        (result.passed_count() as u32, result.total_cases() as u32)
    } else {
        // No per-case detail: single-case binary on the overall status.
        (
            if result.status == JudgeStatus::Success { 1 } else { 0 },
            1,
        )
    };
    CodeExecution {
        passed,
        total,
        execution_time: result.execution_time,
        memory_used_kb: result.memory_used / 1024,
        status: format!("{:?}", result.status).to_lowercase(),
        skip_reason: None,
        task_id: Some(result.task_id.clone()),
    }
}

/// 6c: code performance. Runs the sandbox once and stores the outcome.
pub async fn eval_code_performance(ctx: Arc<EvaluatorContext>, state: Value) -> Result<Value> {
    let s = SessionState::from_value(&state)
        .map_err(|e| GraphError::node("eval_code_performance", e))?;

    let Some(code) = s.code_content.clone().filter(|c| !c.trim().is_empty()) else {
        warn!(session_id = %s.session_id, "no code submitted");
        return Ok(update(vec![("code_performance_score", Value::Null)]));
    };

    let result = run_code_execution(&ctx, &s).await;
    let sandbox_usable = result
        .as_ref()
        .map(|r| !(r.cases.is_empty() && r.status == JudgeStatus::Error))
        .unwrap_or(false);

    if let (Some(result), true) = (&result, sandbox_usable) {
        let outcome = execution_outcome(result);
        let correctness_ratio = if outcome.total > 0 {
            outcome.passed as f64 / outcome.total as f64
        } else {
            0.0
        };

        let performance = if correctness_ratio > 0.0 {
            let problem = s.problem_context.as_ref();
            let time_limit = problem
                .map(|p| p.constraints.time_limit_sec)
                .filter(|t| *t > 0.0)
                .unwrap_or(5.0);
            let memory_limit_mb = problem
                .map(|p| p.constraints.memory_limit_mb)
                .filter(|m| *m > 0)
                .unwrap_or(128) as f64;

            let time_score = clamp(100.0 * (1.0 - outcome.execution_time / time_limit));
            let memory_mb = outcome.memory_used_kb as f64 / 1024.0;
            let mem_score = clamp(100.0 * (1.0 - memory_mb / memory_limit_mb));
            (time_score * 0.6 + mem_score * 0.4).round()
        } else {
            0.0
        };

        info!(
            session_id = %s.session_id,
            performance,
            passed = outcome.passed,
            total = outcome.total,
            "code performance from execution"
        );
        ctx.persist_evaluation(
            &s.session_id,
            None,
            EvaluationType::HolisticPerformance,
            "eval_code_performance",
            Some(performance),
            None,
            Some(&json!({"execution": outcome})),
        )
        .await;
        return Ok(update(vec![
            ("code_performance_score", json!(performance)),
            (
                "code_execution",
                serde_json::to_value(&outcome)
                    .map_err(|e| GraphError::node("eval_code_performance", e))?,
            ),
        ]));
    }

    // Sandbox timeout or infrastructure error: LLM-judged fallback.
    let skip_reason = match &result {
        None => "execution timed out or queue unavailable".to_string(),
        Some(r) => format!(
            "sandbox error: {}",
            r.stderr.clone().unwrap_or_else(|| "unknown".to_string())
        ),
    };
    warn!(session_id = %s.session_id, skip_reason = %skip_reason, "falling back to LLM code judgement");

    match llm_code_score(&ctx, &code, "performance").await {
        Ok((score, usage)) => {
            let outcome = CodeExecution {
                skip_reason: Some(skip_reason),
                ..Default::default()
            };
            ctx.persist_evaluation(
                &s.session_id,
                None,
                EvaluationType::HolisticPerformance,
                "eval_code_performance",
                Some(score),
                None,
                Some(&json!({"execution": outcome})),
            )
            .await;
            Ok(update(vec![
                ("code_performance_score", json!(score)),
                (
                    "code_execution",
                    serde_json::to_value(&outcome)
                        .map_err(|e| GraphError::node("eval_code_performance", e))?,
                ),
                ("eval_tokens", token_update(usage)),
            ]))
        }
        Err(e) => {
            warn!(session_id = %s.session_id, error = %e, "LLM performance fallback failed");
            Ok(update(vec![
                ("code_performance_score", json!(0.0)),
                (
                    "code_execution",
                    serde_json::to_value(CodeExecution {
                        skip_reason: Some(format!("{skip_reason}; llm fallback failed: {e}")),
                        ..Default::default()
                    })
                    .map_err(|err| GraphError::node("eval_code_performance", err))?,
                ),
            ]))
        }
    }
}

/// 6d: code correctness from the stored execution outcome (pass ratio), or
/// the LLM fallback when execution was skipped.
pub async fn eval_code_correctness(ctx: Arc<EvaluatorContext>, state: Value) -> Result<Value> {
    let s = SessionState::from_value(&state)
        .map_err(|e| GraphError::node("eval_code_correctness", e))?;

    let Some(code) = s.code_content.clone().filter(|c| !c.trim().is_empty()) else {
        return Ok(update(vec![("code_correctness_score", Value::Null)]));
    };

    if let Some(execution) = &s.code_execution {
        if execution.skip_reason.is_none() && execution.total > 0 {
            let score = round2(100.0 * execution.passed as f64 / execution.total as f64);
            info!(
                session_id = %s.session_id,
                score,
                passed = execution.passed,
                total = execution.total,
                "code correctness from execution"
            );
            return Ok(update(vec![("code_correctness_score", json!(score))]));
        }
    }

    match llm_code_score(&ctx, &code, "correctness").await {
        Ok((score, usage)) => Ok(update(vec![
            ("code_correctness_score", json!(score)),
            ("eval_tokens", token_update(usage)),
        ])),
        Err(e) => {
            warn!(session_id = %s.session_id, error = %e, "LLM correctness fallback failed");
            Ok(update(vec![
                ("code_correctness_score", json!(0.0)),
                (
                    "error_message",
                    json!(format!("correctness evaluation failed: {e}")),
                ),
            ]))
        }
    }
}

/// 7: final aggregation.
///
/// `prompt = mean(flow, aggregate)` over non-null members;
/// `total = 0.25·prompt + 0.25·performance + 0.50·correctness`;
/// grade A ≥90, B ≥80, C ≥70, D ≥60, else F.
pub async fn aggregate_final_scores(ctx: Arc<EvaluatorContext>, state: Value) -> Result<Value> {
    let s = SessionState::from_value(&state)
        .map_err(|e| GraphError::node("aggregate_final_scores", e))?;

    let prompt_members: Vec<f64> = [s.holistic_flow_score, s.aggregate_turn_score]
        .into_iter()
        .flatten()
        .collect();
    let prompt_score = if prompt_members.is_empty() {
        0.0
    } else {
        prompt_members.iter().sum::<f64>() / prompt_members.len() as f64
    };
    let performance_score = s.code_performance_score.unwrap_or(0.0);
    let correctness_score = s.code_correctness_score.unwrap_or(0.0);

    let total_score = prompt_score * 0.25 + performance_score * 0.25 + correctness_score * 0.50;
    let grade = match total_score {
        t if t >= 90.0 => "A",
        t if t >= 80.0 => "B",
        t if t >= 70.0 => "C",
        t if t >= 60.0 => "D",
        _ => "F",
    };

    let final_scores = FinalScores {
        prompt_score: round2(prompt_score),
        performance_score: round2(performance_score),
        correctness_score: round2(correctness_score),
        total_score: round2(total_score),
        grade: grade.to_string(),
    };

    info!(
        session_id = %s.session_id,
        total = final_scores.total_score,
        grade = %final_scores.grade,
        "final scores aggregated"
    );

    let scores_value =
        serde_json::to_value(&final_scores).map_err(|e| GraphError::node("aggregate_final_scores", e))?;
    if let Err(e) = ctx.state_repo.save_final_scores(&s.session_id, &scores_value).await {
        warn!(session_id = %s.session_id, error = %e, "final score cache write failed (continuing)");
    }

    Ok(update(vec![("final_scores", scores_value)]))
}
