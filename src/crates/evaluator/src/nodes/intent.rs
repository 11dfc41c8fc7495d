//! Intent analyzer node: two-layer guardrail + request classification.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use llm::{chat_structured, ChatRequest};
use stategraph_core::{ChatMessage, GraphError, Result};

use crate::context::EvaluatorContext;
use crate::enums::{BlockReason, GuideStrategy, IntentStatus, RequestType, SafetyStatus};
use crate::guardrail;
use crate::problem::ProblemContext;
use crate::state::{token_update, update, SessionState};

/// Structured output of the Layer-2 classifier.
#[derive(Debug, Deserialize)]
pub struct IntentAnalysisResult {
    pub status: SafetyStatus,
    #[serde(default)]
    pub block_reason: Option<BlockReason>,
    pub request_type: RequestType,
    #[serde(default)]
    pub guide_strategy: Option<GuideStrategy>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub is_submission_request: bool,
    #[serde(default = "default_true")]
    pub guardrail_passed: bool,
    #[serde(default)]
    pub violation_message: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}

fn default_true() -> bool {
    true
}

impl IntentAnalysisResult {
    /// Enforce logical consistency between status and block reason.
    ///
    /// BLOCKED without a reason defaults to OFF_TOPIC; SAFE clears any
    /// spurious reason.
    pub fn normalize(mut self) -> Self {
        match self.status {
            SafetyStatus::Blocked if self.block_reason.is_none() => {
                self.block_reason = Some(BlockReason::OffTopic);
            }
            SafetyStatus::Safe => {
                self.block_reason = None;
            }
            _ => {}
        }
        self
    }

    /// Translate to the routing status.
    pub fn intent_status(&self) -> IntentStatus {
        match (self.status, self.request_type) {
            (SafetyStatus::Blocked, _) => IntentStatus::FailedGuardrail,
            (SafetyStatus::Safe, RequestType::Submission) => IntentStatus::PassedSubmit,
            (SafetyStatus::Safe, RequestType::Chat) => IntentStatus::PassedHint,
        }
    }
}

fn problem_info_section(problem: Option<&ProblemContext>) -> String {
    let Some(problem) = problem else {
        return String::new();
    };
    let info = &problem.basic_info;
    let mut lines = vec![
        format!("- Problem: {} ({})", info.title, info.problem_id),
        format!(
            "- Required algorithms: {}",
            if problem.ai_guide.key_algorithms.is_empty() {
                "none".to_string()
            } else {
                problem.ai_guide.key_algorithms.join(", ")
            }
        ),
    ];
    if !info.description_summary.is_empty() {
        lines.push(format!("- Description: {}", info.description_summary));
    }
    if !info.input_format.is_empty() {
        lines.push(format!("- Input format: {}", info.input_format));
    }
    if !info.output_format.is_empty() {
        lines.push(format!("- Output format: {}", info.output_format));
    }
    if !problem.constraints.logic_reasoning.is_empty() {
        lines.push(format!(
            "- Constraint analysis: {}",
            problem.constraints.logic_reasoning
        ));
    }
    if !problem.ai_guide.solution_architecture.is_empty() {
        lines.push(format!(
            "- Solution architecture: {}",
            problem.ai_guide.solution_architecture
        ));
    }
    format!("[Problem]\n{}\n", lines.join("\n"))
}

/// Record the score-0 TurnLog of a blocked turn (guardrail implies zero).
async fn record_guardrail_turn_log(ctx: &EvaluatorContext, s: &SessionState, violation: &str) {
    let prompt_summary: String = s.human_message.chars().take(200).collect();
    let log = json!({
        "turn": s.current_turn,
        "intent": "HINT_OR_QUERY",
        "intent_confidence": 0.0,
        "is_guardrail_failed": true,
        "user_prompt_summary": prompt_summary,
        "rubrics": [],
        "final_reasoning": format!("blocked: {violation}"),
        "turn_score": 0.0,
        "ai_answer_summary": Value::Null,
        "evaluated_at": chrono::Utc::now().to_rfc3339(),
    });
    if let Err(e) = ctx
        .state_repo
        .save_turn_log(&s.session_id, s.current_turn, &log)
        .await
    {
        warn!(session_id = %s.session_id, error = %e, "guardrail turn log write failed (continuing)");
    }
    ctx.persist_evaluation(
        &s.session_id,
        Some(s.current_turn as i64),
        storage::EvaluationType::TurnEval,
        "intent_analyzer",
        Some(0.0),
        Some(violation),
        Some(&log),
    )
    .await;
}

/// Two-layer intent/guardrail analysis.
///
/// Layer 1 is the keyword prefilter (no LLM); Layer 2 is the structured LLM
/// classifier. A rate-limit failure surfaces as `FAILED_RATE_LIMIT` with no
/// state corruption; other classifier failures propagate as graph errors.
pub async fn intent_analyzer(ctx: Arc<EvaluatorContext>, state: Value) -> Result<Value> {
    let s = SessionState::from_value(&state).map_err(|e| GraphError::node("intent_analyzer", e))?;

    if s.human_message.trim().is_empty() {
        warn!(session_id = %s.session_id, "empty message, passing as hint request");
        return Ok(update(vec![
            ("intent_status", json!(IntentStatus::PassedHint)),
            ("is_guardrail_failed", json!(false)),
            ("guide_strategy", Value::Null),
            ("keywords", json!([])),
        ]));
    }

    // Layer 1: keyword prefilter over the message and the recent turns.
    let problem_keywords = s
        .problem_context
        .as_ref()
        .map(|p| p.guardrail_keywords())
        .unwrap_or_default();
    let recent_history = s.recent_contents(3);

    if let Some(block) = guardrail::prefilter(&s.human_message, &problem_keywords, &recent_history)
    {
        info!(
            session_id = %s.session_id,
            reason = ?block.block_reason,
            "layer-1 guardrail block"
        );
        record_guardrail_turn_log(&ctx, &s, &block.violation_message).await;
        return Ok(update(vec![
            ("intent_status", json!(IntentStatus::FailedGuardrail)),
            ("is_guardrail_failed", json!(true)),
            ("guardrail_message", json!(block.violation_message)),
            ("guide_strategy", Value::Null),
            ("keywords", json!([])),
        ]));
    }

    // Layer 2: LLM structured classification.
    let problem = s.problem_context.as_ref();
    let title = problem
        .map(|p| p.basic_info.title.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let algorithms = problem
        .map(|p| p.ai_guide.key_algorithms.join(", "))
        .unwrap_or_default();
    let additional_block_criteria = if algorithms.is_empty() {
        String::new()
    } else {
        format!(
            "- Requests to solve it with an algorithm that contradicts the problem \
             characteristics ({algorithms})."
        )
    };

    let system_prompt = ctx
        .prompts
        .render(
            "intent_analyzer",
            &[
                ("problem_info_section", problem_info_section(problem).as_str()),
                ("problem_title", title.as_str()),
                ("algorithms_text", algorithms.as_str()),
                ("additional_block_criteria", additional_block_criteria.as_str()),
            ],
        )
        .map_err(|e| GraphError::node("intent_analyzer", e))?;

    let request = ChatRequest::new(vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(s.human_message.clone()),
    ])
    .with_temperature(0.3);

    match chat_structured::<IntentAnalysisResult>(ctx.chat_model.as_ref(), request).await {
        Ok((result, usage)) => {
            let result = result.normalize();
            let intent_status = result.intent_status();
            info!(
                session_id = %s.session_id,
                status = ?intent_status,
                guide_strategy = ?result.guide_strategy,
                "layer-2 classification done"
            );
            if intent_status == IntentStatus::FailedGuardrail {
                let violation = result
                    .violation_message
                    .clone()
                    .unwrap_or_else(|| "blocked by classifier".to_string());
                record_guardrail_turn_log(&ctx, &s, &violation).await;
            }
            Ok(update(vec![
                ("intent_status", json!(intent_status)),
                (
                    "is_guardrail_failed",
                    json!(intent_status == IntentStatus::FailedGuardrail),
                ),
                (
                    "guardrail_message",
                    json!(result.violation_message.clone()),
                ),
                (
                    "is_submitted",
                    json!(s.is_submitted || result.is_submission_request),
                ),
                ("request_type", json!(result.request_type)),
                ("guide_strategy", json!(result.guide_strategy)),
                ("keywords", json!(result.keywords)),
                ("chat_tokens", token_update(usage)),
            ]))
        }
        Err(e) if e.is_rate_limited() => {
            warn!(session_id = %s.session_id, error = %e, "classifier rate limited");
            Ok(update(vec![
                ("intent_status", json!(IntentStatus::FailedRateLimit)),
                ("is_guardrail_failed", json!(false)),
                ("error_message", json!(e.to_string())),
                ("retry_count", json!(s.retry_count + 1)),
                ("guide_strategy", Value::Null),
                ("keywords", json!([])),
            ]))
        }
        Err(e) => Err(GraphError::node("intent_analyzer", e)),
    }
}
