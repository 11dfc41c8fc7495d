//! Writer node: the Socratic reply generator.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use llm::{ChatRequest, LlmError};
use stategraph_core::{ChatMessage, GraphError, MessageRole, Result};

use crate::context::EvaluatorContext;
use crate::enums::{GuideStrategy, RequestType, WriterStatus};
use crate::guardrail::CODE_GENERATION_PHRASES;
use crate::problem::ProblemContext;
use crate::state::{token_update, update, SessionState};

const HISTORY_WINDOW: usize = 10;
const EMPTY_REPLY_FALLBACK: &str =
    "Sorry, I could not generate a response. Please try again.";

/// Vocabulary that marks the hint/approach context enabling full code.
const CONTEXT_KEYWORDS: &[&str] = &[
    "힌트",
    "점화식",
    "접근",
    "방법",
    "hint",
    "recurrence",
    "approach",
];

/// Explicit references to earlier turns.
const PRIOR_TURN_REFERENCES: &[&str] = &["제안해주신", "이전", "앞서", "말한", "바탕으로"];

/// Detect a code-generation request that earns `FULL_CODE_ALLOWED`:
/// the current message carries a code-gen phrase AND either the recent turns
/// discussed hints/recurrences/approaches or the message references earlier
/// turns explicitly.
pub fn is_code_generation_request(message: &str, recent_history: &[String]) -> bool {
    let msg = message.to_lowercase();
    if !CODE_GENERATION_PHRASES.iter().any(|p| msg.contains(p)) {
        return false;
    }
    let has_previous_context = recent_history.iter().any(|entry| {
        let entry = entry.to_lowercase();
        CONTEXT_KEYWORDS.iter().any(|kw| entry.contains(kw))
    });
    has_previous_context || PRIOR_TURN_REFERENCES.iter().any(|r| msg.contains(r))
}

/// Render the problem-info and hint-roadmap prompt sections. Shared with the
/// holistic flow evaluator, which grades against the same roadmap.
pub fn problem_sections(problem: Option<&ProblemContext>) -> (String, String) {
    let Some(problem) = problem else {
        return (String::new(), String::new());
    };
    let info = &problem.basic_info;
    let guide = &problem.ai_guide;

    let mut info_lines = vec![
        format!("- Problem: {} ({})", info.title, info.problem_id),
        format!(
            "- Required algorithms: {}",
            if guide.key_algorithms.is_empty() {
                "none".to_string()
            } else {
                guide.key_algorithms.join(", ")
            }
        ),
    ];
    if !info.description_summary.is_empty() {
        info_lines.push(format!("- Description: {}", info.description_summary));
    }
    if !info.input_format.is_empty() {
        info_lines.push(format!("- Input format: {}", info.input_format));
    }
    if !info.output_format.is_empty() {
        info_lines.push(format!("- Output format: {}", info.output_format));
    }
    if !guide.solution_architecture.is_empty() {
        info_lines.push(format!(
            "- Solution architecture: {}",
            guide.solution_architecture
        ));
    }
    let info_section = format!("[Problem]\n{}\n\n", info_lines.join("\n"));

    let mut roadmap_section = String::new();
    if let Some(roadmap) = &guide.hint_roadmap {
        roadmap_section.push_str(&format!(
            "[Hint roadmap]\n- Step 1: {}\n- Step 2: {}\n- Step 3: {}\n- Step 4: {}\n\n",
            roadmap.step_1_concept,
            roadmap.step_2_state,
            roadmap.step_3_transition,
            roadmap.step_4_base_case,
        ));
    }
    if !guide.common_pitfalls.is_empty() {
        let pitfalls: Vec<String> = guide
            .common_pitfalls
            .iter()
            .map(|p| format!("- {p}"))
            .collect();
        roadmap_section.push_str(&format!(
            "[Common pitfalls (reference)]\n{}\n\n",
            pitfalls.join("\n")
        ));
    }

    (info_section, roadmap_section)
}

/// Selected system prompt plus the effective guide strategy.
pub struct WriterPrompt {
    /// Rendered system prompt.
    pub system_prompt: String,
    /// Strategy after the context-based upgrade, if any.
    pub guide_strategy: GuideStrategy,
}

/// Select the writer's system prompt for the current state. Also used by the
/// streaming path, which drives the model directly.
pub fn select_system_prompt(
    ctx: &EvaluatorContext,
    s: &SessionState,
) -> std::result::Result<WriterPrompt, crate::prompts::PromptError> {
    // Guardrail violations always get the refusal template.
    if s.is_guardrail_failed {
        let message = s
            .guardrail_message
            .clone()
            .unwrap_or_else(|| "inappropriate request".to_string());
        return Ok(WriterPrompt {
            system_prompt: ctx
                .prompts
                .render("writer_guardrail", &[("guardrail_message", message.as_str())])?,
            guide_strategy: s.guide_strategy.unwrap_or(GuideStrategy::LogicHint),
        });
    }

    // Submission acknowledgement.
    if s.request_type == Some(RequestType::Submission) {
        return Ok(WriterPrompt {
            system_prompt: ctx
                .prompts
                .render_section("writer_normal", "submission_template", &[])?,
            guide_strategy: s.guide_strategy.unwrap_or(GuideStrategy::LogicHint),
        });
    }

    // Context-based upgrade to full code generation.
    let recent = s.recent_contents(3);
    let mut guide_strategy = s.guide_strategy.unwrap_or(GuideStrategy::LogicHint);
    let mut code_generation_section = String::new();
    if is_code_generation_request(&s.human_message, &recent) {
        guide_strategy = GuideStrategy::FullCodeAllowed;
        code_generation_section = ctx
            .prompts
            .render_section("writer_normal", "code_generation_section_template", &[])?;
    }

    let (info_section, roadmap_section) = problem_sections(s.problem_context.as_ref());
    let memory = match &s.memory_summary {
        Some(summary) if !summary.is_empty() => {
            format!("\nSummary of earlier conversation:\n{summary}")
        }
        _ => String::new(),
    };
    let keywords = if s.keywords.is_empty() {
        "none".to_string()
    } else {
        s.keywords.join(", ")
    };

    let system_prompt = ctx.prompts.render(
        "writer_normal",
        &[
            ("problem_info_section", info_section.as_str()),
            ("status", "SAFE"),
            ("guide_strategy", guide_strategy.as_str()),
            ("code_generation_section", code_generation_section.as_str()),
            ("hint_roadmap_section", roadmap_section.as_str()),
            ("memory_summary", memory.as_str()),
            ("keywords", keywords.as_str()),
        ],
    )?;

    Ok(WriterPrompt {
        system_prompt,
        guide_strategy,
    })
}

/// Build the outgoing envelope: system + last ≤10 non-empty history entries
/// + the current user message. Providers reject empty message arrays, so an
/// all-empty assembly degrades to a single greeting system message.
pub fn assemble_messages(system_prompt: &str, s: &SessionState) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    if !system_prompt.trim().is_empty() {
        messages.push(ChatMessage::system(system_prompt));
    }

    let start = s.messages.len().saturating_sub(HISTORY_WINDOW);
    for msg in &s.messages[start..] {
        if !msg.is_empty() {
            messages.push(msg.clone());
        }
    }

    if !s.human_message.trim().is_empty() {
        messages.push(ChatMessage::user(s.human_message.clone()));
    }

    if messages.is_empty() {
        messages.push(ChatMessage::system("Hello! How can I help you?"));
    }
    messages
}

fn classify_failure(e: &LlmError) -> WriterStatus {
    if e.is_rate_limited() {
        WriterStatus::FailedRateLimit
    } else if e.is_context_overflow() {
        WriterStatus::FailedThreshold
    } else {
        WriterStatus::FailedTechnical
    }
}

/// Generate the AI reply. The writer never errors out of the node: failures
/// are classified into a writer status the router acts on.
pub async fn writer(ctx: Arc<EvaluatorContext>, state: Value) -> Result<Value> {
    let s = SessionState::from_value(&state).map_err(|e| GraphError::node("writer", e))?;

    let prompt = select_system_prompt(&ctx, &s).map_err(|e| GraphError::node("writer", e))?;
    let messages = assemble_messages(&prompt.system_prompt, &s);

    info!(
        session_id = %s.session_id,
        turn = s.current_turn,
        guide_strategy = %prompt.guide_strategy.as_str(),
        guardrail_failed = s.is_guardrail_failed,
        messages = messages.len(),
        "generating reply"
    );

    match ctx.chat_model.chat(ChatRequest::new(messages)).await {
        Ok(response) => {
            let mut ai_content = response.content;
            if ai_content.trim().is_empty() {
                warn!(session_id = %s.session_id, "model returned an empty reply");
                ai_content = EMPTY_REPLY_FALLBACK.to_string();
            }

            // Index range of the turn pair about to be appended; the
            // submission-time guard uses this mapping to reconstruct turns.
            let start_idx = s.messages.len();
            let end_idx = start_idx + 1;
            if let Err(e) = ctx
                .state_repo
                .save_turn_mapping(&s.session_id, s.current_turn, start_idx, end_idx)
                .await
            {
                warn!(session_id = %s.session_id, error = %e, "turn mapping write failed (continuing)");
            }

            let now = Utc::now();
            let user_envelope = ChatMessage {
                role: MessageRole::User,
                content: s.human_message.clone(),
                turn: Some(s.current_turn),
                timestamp: Some(now),
            };
            let ai_envelope = ChatMessage {
                role: MessageRole::Assistant,
                content: ai_content.clone(),
                turn: Some(s.current_turn),
                timestamp: Some(now),
            };

            Ok(update(vec![
                ("ai_message", json!(ai_content)),
                (
                    "messages",
                    json!([user_envelope, ai_envelope]),
                ),
                ("writer_status", json!(WriterStatus::Success)),
                ("writer_error", Value::Null),
                ("guide_strategy", json!(prompt.guide_strategy)),
                (
                    "chat_tokens",
                    token_update(response.usage.unwrap_or_default()),
                ),
            ]))
        }
        Err(e) => {
            let status = classify_failure(&e);
            warn!(session_id = %s.session_id, status = ?status, error = %e, "reply generation failed");
            let mut entries = vec![
                ("ai_message", Value::Null),
                ("writer_status", json!(status)),
                ("writer_error", json!(e.to_string())),
                (
                    "error_message",
                    json!(format!("reply generation failed: {e}")),
                ),
            ];
            if status == WriterStatus::FailedRateLimit {
                entries.push(("retry_count", json!(s.retry_count + 1)));
            }
            Ok(update(entries))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::test_context_with;
    use llm::testing::{MockChatModel, MockReply};

    fn base_state() -> Value {
        json!({
            "session_id": "session_1",
            "spec_id": 10,
            "current_turn": 2,
            "human_message": "어떻게 시작하면 좋을까요?",
            "messages": [
                {"role": "user", "content": "첫 질문", "turn": 1},
                {"role": "assistant", "content": "첫 답변", "turn": 1},
            ],
            "problem_context": {
                "basic_info": {"problem_id": "2098", "title": "Traveling Salesman Circuit"},
                "ai_guide": {"key_algorithms": ["Dynamic Programming"]},
            },
        })
    }

    #[tokio::test]
    async fn success_emits_turn_tagged_pair_and_mapping() {
        let chat = Arc::new(MockChatModel::with_replies(vec!["Consider bitmasks.".into()]));
        let ctx = test_context_with(chat, Arc::new(MockChatModel::new())).await;

        let out = writer(ctx.clone(), base_state()).await.unwrap();
        assert_eq!(out["writer_status"], "SUCCESS");
        assert_eq!(out["ai_message"], "Consider bitmasks.");

        let pair = out["messages"].as_array().unwrap();
        assert_eq!(pair.len(), 2);
        assert_eq!(pair[0]["role"], "user");
        assert_eq!(pair[0]["turn"], 2);
        assert_eq!(pair[1]["role"], "assistant");
        assert_eq!(pair[1]["turn"], 2);

        let mapping = ctx.state_repo.get_turn_mapping("session_1").await.unwrap();
        assert_eq!(mapping.get(&2), Some(&(2, 3)));
    }

    #[tokio::test]
    async fn guardrail_failure_uses_refusal_template() {
        let chat = Arc::new(MockChatModel::with_replies(vec![
            "I can't share the answer during the exam.".into(),
        ]));
        let ctx = test_context_with(chat.clone(), Arc::new(MockChatModel::new())).await;

        let mut state = base_state();
        state["is_guardrail_failed"] = json!(true);
        state["guardrail_message"] = json!("direct answer-code request detected");

        let out = writer(ctx, state).await.unwrap();
        assert_eq!(out["writer_status"], "SUCCESS");

        let request = &chat.recorded_requests()[0];
        let system = &request.messages[0];
        assert!(system.content.contains("blocked"));
        assert!(system.content.contains("direct answer-code request detected"));
    }

    #[tokio::test]
    async fn code_generation_with_context_upgrades_strategy() {
        let chat = Arc::new(MockChatModel::with_replies(vec!["def tsp(): ...".into()]));
        let ctx = test_context_with(chat.clone(), Arc::new(MockChatModel::new())).await;

        let mut state = base_state();
        state["human_message"] = json!("제안해주신 점화식 바탕으로 코드 작성해줘");
        state["messages"] = json!([
            {"role": "user", "content": "점화식 힌트 주세요", "turn": 1},
            {"role": "assistant", "content": "dp[curr][visited] 점화식을 생각해보세요", "turn": 1},
        ]);

        let out = writer(ctx, state).await.unwrap();
        assert_eq!(out["guide_strategy"], "FULL_CODE_ALLOWED");
        let system = &chat.recorded_requests()[0].messages[0];
        assert!(system.content.contains("FULL_CODE_ALLOWED"));
    }

    #[tokio::test]
    async fn code_generation_without_context_stays_default() {
        assert!(!is_code_generation_request("코드 작성해줘", &[]));
        assert!(is_code_generation_request(
            "코드 작성해줘",
            &["점화식 얘기했던 것".to_string()]
        ));
        assert!(is_code_generation_request("앞서 말한대로 코드 작성해줘", &[]));
    }

    #[tokio::test]
    async fn failure_taxonomy_maps_statuses() {
        for (err, expected) in [
            (
                LlmError::RateLimitExceeded("quota".into()),
                "FAILED_RATE_LIMIT",
            ),
            (
                LlmError::ContextOverflow("context length".into()),
                "FAILED_THRESHOLD",
            ),
            (LlmError::InvalidResponse("bad".into()), "FAILED_TECHNICAL"),
        ] {
            let chat = Arc::new(MockChatModel::with_script(vec![MockReply::Error(err)]));
            let ctx = test_context_with(chat, Arc::new(MockChatModel::new())).await;
            let out = writer(ctx, base_state()).await.unwrap();
            assert_eq!(out["writer_status"], expected);
            assert!(out["ai_message"].is_null());
        }
    }

    #[tokio::test]
    async fn empty_reply_gets_fallback_text() {
        let chat = Arc::new(MockChatModel::with_replies(vec!["   ".into()]));
        let ctx = test_context_with(chat, Arc::new(MockChatModel::new())).await;
        let out = writer(ctx, base_state()).await.unwrap();
        assert_eq!(out["ai_message"], EMPTY_REPLY_FALLBACK);
    }

    #[tokio::test]
    async fn history_is_windowed_and_filtered() {
        let chat = Arc::new(MockChatModel::with_replies(vec!["ok".into()]));
        let ctx = test_context_with(chat.clone(), Arc::new(MockChatModel::new())).await;

        let mut state = base_state();
        let mut history = Vec::new();
        for i in 0..12 {
            history.push(json!({"role": "user", "content": format!("q{i}"), "turn": i}));
        }
        history.push(json!({"role": "assistant", "content": "   ", "turn": 12}));
        state["messages"] = json!(history);

        writer(ctx, state).await.unwrap();
        let request = &chat.recorded_requests()[0];
        // system + 10-window (minus the empty entry) + current user message.
        let history_count = request
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::User || m.role == MessageRole::Assistant)
            .count();
        assert!(history_count <= 11);
        assert!(request.messages.iter().all(|m| !m.content.trim().is_empty()));
    }
}
