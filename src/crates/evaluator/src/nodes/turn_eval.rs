//! Per-turn prompt-quality evaluator.
//!
//! A subgraph over its own state record:
//!
//! ```text
//! START → intent_analysis → (one rubric evaluator) → summarize_answer
//!       → aggregate_turn_log → END
//! ```
//!
//! Intent analysis classifies the user prompt; the router picks exactly one
//! rubric evaluator; the evaluator anchors an LLM judgement on quantitative
//! metrics and produces weighted rubric scores; the aggregation step writes
//! the TurnLog to the cache and the durable evaluation store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use llm::{chat_structured, ChatRequest, TokenUsage};
use stategraph_core::{
    ChatMessage, CompiledGraph, GraphError, InvokeConfig, Result, StateGraph, END, START,
};
use stategraph_core::state::{StateSchema, TokenSumReducer};
use storage::EvaluationType;

use crate::context::EvaluatorContext;
use crate::enums::CodeIntentType;
use crate::metrics;
use crate::problem::ProblemContext;
use crate::state::{token_update, update};

/// Input for evaluating one turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnEvalInput {
    pub session_id: String,
    pub turn: u32,
    pub human_message: String,
    pub ai_message: String,
    /// AI reply of the previous turn, for context-aware judging.
    pub previous_context: Option<String>,
    pub problem_context: Option<ProblemContext>,
    pub is_guardrail_failed: bool,
    pub guardrail_message: Option<String>,
}

/// One rubric entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricScore {
    pub name: String,
    pub score: f64,
    pub reasoning: String,
}

/// Structured output of a rubric evaluator.
#[derive(Debug, Deserialize)]
struct RubricEvaluation {
    #[serde(default)]
    rubrics: Vec<RubricScore>,
    #[serde(default)]
    final_reasoning: String,
}

/// Structured output of the intent classifier.
#[derive(Debug, Deserialize)]
struct IntentClassification {
    #[serde(default)]
    intent_types: Vec<CodeIntentType>,
    #[serde(default)]
    confidence: f64,
}

/// Result of evaluating one turn.
#[derive(Debug, Clone)]
pub struct TurnEvaluation {
    pub turn: u32,
    pub intent: CodeIntentType,
    pub turn_score: f64,
    pub final_reasoning: String,
    pub rubrics: Vec<RubricScore>,
    pub turn_log: Value,
    pub eval_tokens: TokenUsage,
}

/// Which metric group anchors a criterion's fallback score.
#[derive(Debug, Clone, Copy)]
enum MetricAnchor {
    Clarity,
    Examples,
    Rules,
    Context,
    Relevance,
}

struct Criterion {
    name: &'static str,
    weight: f64,
    description: &'static str,
    anchor: MetricAnchor,
}

/// Rubric evaluator families; SYSTEM_PROMPT and RULE_SETTING share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RubricKind {
    Rules,
    Generation,
    Optimization,
    Debugging,
    TestCase,
    HintQuery,
    FollowUp,
}

impl RubricKind {
    fn for_intent(intent: CodeIntentType) -> Self {
        match intent {
            CodeIntentType::SystemPrompt | CodeIntentType::RuleSetting => RubricKind::Rules,
            CodeIntentType::Generation => RubricKind::Generation,
            CodeIntentType::Optimization => RubricKind::Optimization,
            CodeIntentType::Debugging => RubricKind::Debugging,
            CodeIntentType::TestCase => RubricKind::TestCase,
            CodeIntentType::HintOrQuery => RubricKind::HintQuery,
            CodeIntentType::FollowUp => RubricKind::FollowUp,
        }
    }

    fn branch_key(&self) -> &'static str {
        match self {
            RubricKind::Rules => "rules",
            RubricKind::Generation => "generation",
            RubricKind::Optimization => "optimization",
            RubricKind::Debugging => "debugging",
            RubricKind::TestCase => "test_case",
            RubricKind::HintQuery => "hint_query",
            RubricKind::FollowUp => "follow_up",
        }
    }

    fn node_name(&self) -> String {
        format!("eval_{}", self.branch_key())
    }

    fn criteria(&self) -> &'static [Criterion] {
        match self {
            RubricKind::Rules => &[
                Criterion { name: "Rule Clarity", weight: 0.35, description: "are the rules stated unambiguously?", anchor: MetricAnchor::Clarity },
                Criterion { name: "Structure", weight: 0.25, description: "tags, lists, or sections organising the rules", anchor: MetricAnchor::Rules },
                Criterion { name: "Constraint Coverage", weight: 0.25, description: "are concrete constraints and requirements given?", anchor: MetricAnchor::Rules },
                Criterion { name: "Problem Relevance", weight: 0.15, description: "do the rules fit this problem?", anchor: MetricAnchor::Relevance },
            ],
            RubricKind::Generation => &[
                Criterion { name: "Clarity", weight: 0.30, description: "is the requested code specified precisely?", anchor: MetricAnchor::Clarity },
                Criterion { name: "Examples", weight: 0.25, description: "input/output pairs or concrete examples", anchor: MetricAnchor::Examples },
                Criterion { name: "Problem Relevance", weight: 0.25, description: "does the request target the problem's algorithms?", anchor: MetricAnchor::Relevance },
                Criterion { name: "Context Use", weight: 0.20, description: "does it build on the conversation so far?", anchor: MetricAnchor::Context },
            ],
            RubricKind::Optimization => &[
                Criterion { name: "Clarity", weight: 0.25, description: "is the optimisation goal explicit?", anchor: MetricAnchor::Clarity },
                Criterion { name: "Constraint Awareness", weight: 0.30, description: "are time/memory targets referenced?", anchor: MetricAnchor::Rules },
                Criterion { name: "Problem Relevance", weight: 0.25, description: "is the bottleneck tied to this problem?", anchor: MetricAnchor::Relevance },
                Criterion { name: "Context Use", weight: 0.20, description: "does it reference the code being optimised?", anchor: MetricAnchor::Context },
            ],
            RubricKind::Debugging => &[
                Criterion { name: "Clarity", weight: 0.30, description: "is the defect described precisely?", anchor: MetricAnchor::Clarity },
                Criterion { name: "Reproduction", weight: 0.30, description: "failing inputs or observed-vs-expected output", anchor: MetricAnchor::Examples },
                Criterion { name: "Context Use", weight: 0.20, description: "does it reference the earlier code?", anchor: MetricAnchor::Context },
                Criterion { name: "Problem Relevance", weight: 0.20, description: "is the symptom tied to the problem's logic?", anchor: MetricAnchor::Relevance },
            ],
            RubricKind::TestCase => &[
                Criterion { name: "Examples", weight: 0.40, description: "concrete input/output pairs", anchor: MetricAnchor::Examples },
                Criterion { name: "Clarity", weight: 0.25, description: "is the expected behavior unambiguous?", anchor: MetricAnchor::Clarity },
                Criterion { name: "Constraint Awareness", weight: 0.20, description: "edge cases and limits covered", anchor: MetricAnchor::Rules },
                Criterion { name: "Problem Relevance", weight: 0.15, description: "do the cases exercise this problem?", anchor: MetricAnchor::Relevance },
            ],
            RubricKind::HintQuery => &[
                Criterion { name: "Clarity", weight: 0.35, description: "is the question focused and answerable?", anchor: MetricAnchor::Clarity },
                Criterion { name: "Problem Relevance", weight: 0.30, description: "does it target the problem's core difficulty?", anchor: MetricAnchor::Relevance },
                Criterion { name: "Context Use", weight: 0.20, description: "does it build on previous hints?", anchor: MetricAnchor::Context },
                Criterion { name: "Specificity", weight: 0.15, description: "concrete values or cases instead of vagueness", anchor: MetricAnchor::Clarity },
            ],
            RubricKind::FollowUp => &[
                Criterion { name: "Context Use", weight: 0.40, description: "does it engage with the previous reply?", anchor: MetricAnchor::Context },
                Criterion { name: "Clarity", weight: 0.30, description: "is the follow-up direction clear?", anchor: MetricAnchor::Clarity },
                Criterion { name: "Problem Relevance", weight: 0.30, description: "does it keep progressing the problem?", anchor: MetricAnchor::Relevance },
            ],
        }
    }
}

fn anchor_score(metrics: &metrics::PromptMetrics, anchor: MetricAnchor) -> f64 {
    match anchor {
        MetricAnchor::Clarity => metrics.clarity.base_score,
        MetricAnchor::Examples => metrics.examples.base_score,
        MetricAnchor::Rules => metrics.rules.base_score,
        MetricAnchor::Context => metrics.context.base_score,
        MetricAnchor::Relevance => metrics.problem_relevance.base_score,
    }
}

fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// Weighted mean of the rubric scores using the criteria weights, matched by
/// name (case-insensitive). Unmatched rubric entries are ignored; if nothing
/// matches, the plain mean of the returned scores is used.
fn weighted_turn_score(criteria: &[Criterion], rubrics: &[RubricScore]) -> f64 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for criterion in criteria {
        if let Some(entry) = rubrics
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(criterion.name))
        {
            weighted += clamp_score(entry.score) * criterion.weight;
            total_weight += criterion.weight;
        }
    }
    if total_weight > 0.0 {
        clamp_score(weighted / total_weight)
    } else if !rubrics.is_empty() {
        clamp_score(rubrics.iter().map(|r| clamp_score(r.score)).sum::<f64>() / rubrics.len() as f64)
    } else {
        0.0
    }
}

async fn intent_analysis(ctx: Arc<EvaluatorContext>, state: Value) -> Result<Value> {
    let session_id = state["session_id"].as_str().unwrap_or("unknown").to_string();
    let turn = state["turn"].as_u64().unwrap_or(0) as u32;
    let human = state["human_message"].as_str().unwrap_or("").to_string();
    let ai = state["ai_message"].as_str().unwrap_or("").to_string();

    let has_role_tags = metrics::has_role_content_tags(&human);
    let priority_note = if turn == 1 {
        ctx.prompts
            .render_section("eval_intent_analysis", "first_turn_priority_note", &[])
            .unwrap_or_default()
    } else {
        String::new()
    };
    let xml_hint = if has_role_tags {
        ctx.prompts
            .render_section("eval_intent_analysis", "xml_tag_hint", &[])
            .unwrap_or_default()
    } else {
        String::new()
    };

    let system_prompt = ctx
        .prompts
        .render(
            "eval_intent_analysis",
            &[
                ("priority_note", priority_note.as_str()),
                ("xml_hint", xml_hint.as_str()),
            ],
        )
        .map_err(|e| GraphError::node("intent_analysis", e))?;

    let request = ChatRequest::new(vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(format!("User prompt: {human}\n\nAI reply: {ai}")),
    ])
    .with_temperature(0.1);

    match chat_structured::<IntentClassification>(ctx.eval_model.as_ref(), request).await {
        Ok((classification, usage)) => {
            let intent =
                CodeIntentType::resolve(&classification.intent_types, turn, has_role_tags);
            info!(
                session_id = %session_id,
                turn,
                intent = intent.as_str(),
                confidence = classification.confidence,
                "turn intent classified"
            );
            Ok(update(vec![
                ("intent_type", json!(intent)),
                (
                    "intent_confidence",
                    json!(classification.confidence.clamp(0.0, 1.0)),
                ),
                ("eval_tokens", token_update(usage)),
            ]))
        }
        Err(e) => {
            // Classification failure degrades to the weakest intent rather
            // than sinking the whole turn evaluation.
            warn!(session_id = %session_id, turn, error = %e, "intent classification failed");
            Ok(update(vec![
                ("intent_type", json!(CodeIntentType::HintOrQuery)),
                ("intent_confidence", json!(0.0)),
            ]))
        }
    }
}

async fn evaluate_rubric(
    ctx: Arc<EvaluatorContext>,
    state: Value,
    kind: RubricKind,
) -> Result<Value> {
    let human = state["human_message"].as_str().unwrap_or("");
    let is_guardrail_failed = state["is_guardrail_failed"].as_bool().unwrap_or(false);

    if is_guardrail_failed {
        let reason = state["guardrail_message"]
            .as_str()
            .unwrap_or("guardrail violation");
        return Ok(update(vec![
            ("rubrics", json!([])),
            ("final_reasoning", json!(format!("blocked: {reason}"))),
            ("turn_score", json!(0.0)),
        ]));
    }

    let algorithms: Vec<String> = state["problem_context"]["ai_guide"]["key_algorithms"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let prompt_metrics = metrics::compute(human, &algorithms);
    let criteria = kind.criteria();

    let criteria_section: Vec<String> = criteria
        .iter()
        .map(|c| format!("- {} (weight {:.2}): {}", c.name, c.weight, c.description))
        .collect();
    let metrics_json = serde_json::to_string_pretty(&prompt_metrics)
        .map_err(|e| GraphError::node(kind.node_name(), e))?;
    let intent_label = state["intent_type"].as_str().unwrap_or("HINT_OR_QUERY");

    let system_prompt = ctx
        .prompts
        .render(
            "rubric_eval",
            &[
                ("intent_label", intent_label),
                ("criteria_section", criteria_section.join("\n").as_str()),
                ("metrics_json", metrics_json.as_str()),
                (
                    "problem_algorithms",
                    if algorithms.is_empty() {
                        "unknown".to_string()
                    } else {
                        algorithms.join(", ")
                    }
                    .as_str(),
                ),
            ],
        )
        .map_err(|e| GraphError::node(kind.node_name(), e))?;

    let mut user_content = format!("User prompt to grade:\n{human}");
    if let Some(previous) = state["previous_context"].as_str() {
        if !previous.is_empty() {
            user_content = format!("AI reply of the previous turn:\n{previous}\n\n{user_content}");
        }
    }

    let request = ChatRequest::new(vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(user_content),
    ])
    .with_temperature(0.1);

    match chat_structured::<RubricEvaluation>(ctx.eval_model.as_ref(), request).await {
        Ok((evaluation, usage)) => {
            let turn_score = weighted_turn_score(criteria, &evaluation.rubrics);
            Ok(update(vec![
                ("rubrics", json!(evaluation.rubrics)),
                ("final_reasoning", json!(evaluation.final_reasoning)),
                ("turn_score", json!(turn_score)),
                ("eval_tokens", token_update(usage)),
            ]))
        }
        Err(e) => {
            // Degrade to the metric base scores so the turn still gets a
            // deterministic, explainable score.
            warn!(kind = ?kind, error = %e, "rubric LLM failed, using metric anchors");
            let rubrics: Vec<RubricScore> = criteria
                .iter()
                .map(|c| RubricScore {
                    name: c.name.to_string(),
                    score: anchor_score(&prompt_metrics, c.anchor),
                    reasoning: "anchored on quantitative metrics (LLM unavailable)".to_string(),
                })
                .collect();
            let turn_score = weighted_turn_score(criteria, &rubrics);
            Ok(update(vec![
                ("rubrics", json!(rubrics)),
                (
                    "final_reasoning",
                    json!("scored from quantitative metrics; LLM judgement unavailable"),
                ),
                ("turn_score", json!(turn_score)),
            ]))
        }
    }
}

async fn summarize_answer(ctx: Arc<EvaluatorContext>, state: Value) -> Result<Value> {
    let ai = state["ai_message"].as_str().unwrap_or("");
    if ai.trim().is_empty() {
        return Ok(update(vec![("answer_summary", Value::Null)]));
    }

    let system_prompt = ctx
        .prompts
        .render("answer_summary", &[])
        .map_err(|e| GraphError::node("summarize_answer", e))?;
    let request = ChatRequest::new(vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(ai.to_string()),
    ]);

    match ctx.eval_model.chat(request).await {
        Ok(response) => Ok(update(vec![
            ("answer_summary", json!(response.content)),
            (
                "eval_tokens",
                token_update(response.usage.unwrap_or_default()),
            ),
        ])),
        Err(e) => {
            warn!(error = %e, "answer summarization failed");
            Ok(update(vec![("answer_summary", Value::Null)]))
        }
    }
}

async fn aggregate_turn_log(ctx: Arc<EvaluatorContext>, state: Value) -> Result<Value> {
    let session_id = state["session_id"].as_str().unwrap_or("unknown").to_string();
    let turn = state["turn"].as_u64().unwrap_or(0) as u32;
    let human = state["human_message"].as_str().unwrap_or("");
    let is_guardrail_failed = state["is_guardrail_failed"].as_bool().unwrap_or(false);

    // Guardrail-violating turns score zero regardless of the rubric outcome.
    let turn_score = if is_guardrail_failed {
        0.0
    } else {
        clamp_score(state["turn_score"].as_f64().unwrap_or(0.0))
    };

    let prompt_summary: String = human.chars().take(200).collect();
    let turn_log = json!({
        "turn": turn,
        "intent": state["intent_type"],
        "intent_confidence": state["intent_confidence"],
        "is_guardrail_failed": is_guardrail_failed,
        "user_prompt_summary": prompt_summary,
        "rubrics": state["rubrics"],
        "final_reasoning": state["final_reasoning"],
        "turn_score": turn_score,
        "ai_answer_summary": state["answer_summary"],
        "evaluated_at": Utc::now().to_rfc3339(),
    });

    if let Err(e) = ctx.state_repo.save_turn_log(&session_id, turn, &turn_log).await {
        warn!(session_id = %session_id, turn, error = %e, "turn log cache write failed (continuing)");
    }
    ctx.persist_evaluation(
        &session_id,
        Some(turn as i64),
        EvaluationType::TurnEval,
        "turn_evaluator",
        Some(turn_score),
        state["final_reasoning"].as_str(),
        Some(&turn_log),
    )
    .await;

    info!(session_id = %session_id, turn, turn_score, "turn evaluated");
    Ok(update(vec![
        ("turn_log", turn_log.clone()),
        ("turn_score", json!(turn_score)),
    ]))
}

fn subgraph_schema() -> StateSchema {
    let mut schema = StateSchema::new();
    schema.add_field("eval_tokens", Box::new(TokenSumReducer));
    schema
}

/// Compiled per-turn evaluator.
pub struct TurnEvaluator {
    graph: CompiledGraph,
}

impl TurnEvaluator {
    /// Build and compile the subgraph.
    pub fn new(ctx: Arc<EvaluatorContext>) -> Result<Self> {
        let mut graph = StateGraph::with_schema(subgraph_schema());

        {
            let ctx = ctx.clone();
            graph.add_node("intent_analysis", move |state| {
                intent_analysis(ctx.clone(), state)
            });
        }

        let kinds = [
            RubricKind::Rules,
            RubricKind::Generation,
            RubricKind::Optimization,
            RubricKind::Debugging,
            RubricKind::TestCase,
            RubricKind::HintQuery,
            RubricKind::FollowUp,
        ];
        for kind in kinds {
            let ctx = ctx.clone();
            graph.add_node(&kind.node_name(), move |state| {
                evaluate_rubric(ctx.clone(), state, kind)
            });
        }

        {
            let ctx = ctx.clone();
            graph.add_node("summarize_answer", move |state| {
                summarize_answer(ctx.clone(), state)
            });
        }
        {
            let ctx = ctx.clone();
            graph.add_node("aggregate_turn_log", move |state| {
                aggregate_turn_log(ctx.clone(), state)
            });
        }

        graph.add_edge(START, "intent_analysis");
        let branches: Vec<(String, String)> = kinds
            .iter()
            .map(|k| (k.branch_key().to_string(), k.node_name()))
            .collect();
        let branch_refs: Vec<(&str, &str)> = branches
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        graph.add_conditional_edge(
            "intent_analysis",
            |state| {
                let intent: CodeIntentType = serde_json::from_value(state["intent_type"].clone())
                    .unwrap_or(CodeIntentType::HintOrQuery);
                RubricKind::for_intent(intent).branch_key().to_string()
            },
            &branch_refs,
        );
        for kind in kinds {
            graph.add_edge(&kind.node_name(), "summarize_answer");
        }
        graph.add_edge("summarize_answer", "aggregate_turn_log");
        graph.add_edge("aggregate_turn_log", END);

        Ok(Self {
            graph: graph.compile()?,
        })
    }

    /// Evaluate one turn end to end.
    pub async fn evaluate(&self, input: TurnEvalInput) -> Result<TurnEvaluation> {
        let initial = serde_json::to_value(&input)
            .map_err(|e| GraphError::node("turn_evaluator", e))?;
        let final_state = self.graph.invoke(initial, &InvokeConfig::default()).await?;

        let rubrics: Vec<RubricScore> =
            serde_json::from_value(final_state["rubrics"].clone()).unwrap_or_default();
        let intent: CodeIntentType =
            serde_json::from_value(final_state["intent_type"].clone())
                .unwrap_or(CodeIntentType::HintOrQuery);
        let eval_tokens: TokenUsage =
            serde_json::from_value(final_state["eval_tokens"].clone()).unwrap_or_default();

        Ok(TurnEvaluation {
            turn: input.turn,
            intent,
            turn_score: final_state["turn_score"].as_f64().unwrap_or(0.0),
            final_reasoning: final_state["final_reasoning"]
                .as_str()
                .unwrap_or("")
                .to_string(),
            rubrics,
            turn_log: final_state["turn_log"].clone(),
            eval_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::test_context_with;
    use llm::testing::MockChatModel;

    fn input(turn: u32, human: &str, ai: &str) -> TurnEvalInput {
        TurnEvalInput {
            session_id: "session_1".to_string(),
            turn,
            human_message: human.to_string(),
            ai_message: ai.to_string(),
            previous_context: None,
            problem_context: None,
            is_guardrail_failed: false,
            guardrail_message: None,
        }
    }

    fn scripted_eval_model() -> Arc<MockChatModel> {
        // Call order: intent classification, rubric evaluation, summary.
        Arc::new(MockChatModel::with_replies(vec![
            json!({"intent_types": ["GENERATION"], "confidence": 0.9}).to_string(),
            json!({
                "rubrics": [
                    {"name": "Clarity", "score": 80.0, "reasoning": "precise request"},
                    {"name": "Examples", "score": 60.0, "reasoning": "one example"},
                    {"name": "Problem Relevance", "score": 90.0, "reasoning": "targets DP"},
                    {"name": "Context Use", "score": 50.0, "reasoning": "some reference"},
                ],
                "final_reasoning": "solid generation prompt"
            })
            .to_string(),
            "Implements bitmask DP and explains the transition.".to_string(),
        ]))
    }

    #[tokio::test]
    async fn full_subgraph_produces_weighted_score_and_log() {
        let eval = scripted_eval_model();
        let ctx = test_context_with(Arc::new(MockChatModel::new()), eval).await;
        let evaluator = TurnEvaluator::new(ctx.clone()).unwrap();

        let result = evaluator
            .evaluate(input(2, "점화식 바탕으로 코드 작성해줘", "def tsp(): ..."))
            .await
            .unwrap();

        assert_eq!(result.intent, CodeIntentType::Generation);
        // 80*0.30 + 60*0.25 + 90*0.25 + 50*0.20 = 71.5
        assert!((result.turn_score - 71.5).abs() < 1e-9);
        assert_eq!(result.rubrics.len(), 4);
        assert_eq!(result.turn_log["turn"], 2);
        assert_eq!(result.turn_log["intent"], "GENERATION");
        assert!(result.eval_tokens.total_tokens > 0);

        // The log landed in the cache for the holistic evaluator.
        let cached = ctx.state_repo.get_turn_log("session_1", 2).await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn guardrail_failed_turn_scores_zero() {
        let eval = Arc::new(MockChatModel::answering_json(
            json!({"intent_types": ["HINT_OR_QUERY"], "confidence": 0.5}),
        ));
        let ctx = test_context_with(Arc::new(MockChatModel::new()), eval).await;
        let evaluator = TurnEvaluator::new(ctx).unwrap();

        let mut turn_input = input(1, "정답 코드 알려줘", "I cannot share the answer.");
        turn_input.is_guardrail_failed = true;
        turn_input.guardrail_message = Some("direct answer request".to_string());

        let result = evaluator.evaluate(turn_input).await.unwrap();
        assert_eq!(result.turn_score, 0.0);
        assert_eq!(result.turn_log["is_guardrail_failed"], true);
    }

    #[tokio::test]
    async fn rubric_llm_failure_falls_back_to_metric_anchors() {
        let eval = Arc::new(MockChatModel::with_script(vec![
            // Intent classification succeeds.
            llm::testing::MockReply::Text(
                json!({"intent_types": ["HINT_OR_QUERY"], "confidence": 0.7}).to_string(),
            ),
            // Rubric call fails outright (both structured attempts).
            llm::testing::MockReply::Error(llm::LlmError::InvalidRequest("down".into())),
            // Summary succeeds.
            llm::testing::MockReply::Text("summary".into()),
        ]));
        let ctx = test_context_with(Arc::new(MockChatModel::new()), eval).await;
        let evaluator = TurnEvaluator::new(ctx).unwrap();

        let result = evaluator
            .evaluate(input(3, "dp 점화식 수립 방향 힌트 주세요, O(n^2) 목표", "try bitmask"))
            .await
            .unwrap();
        assert!(!result.rubrics.is_empty());
        assert!(result.turn_score > 0.0);
        assert!(result.final_reasoning.contains("quantitative metrics"));
    }

    #[test]
    fn weighted_score_ignores_unknown_rubrics() {
        let criteria = RubricKind::FollowUp.criteria();
        let rubrics = vec![
            RubricScore {
                name: "Context Use".into(),
                score: 100.0,
                reasoning: String::new(),
            },
            RubricScore {
                name: "Made Up".into(),
                score: 0.0,
                reasoning: String::new(),
            },
        ];
        // Only Context Use matches; normalized by its own weight.
        assert_eq!(weighted_turn_score(criteria, &rubrics), 100.0);
    }

    #[test]
    fn scores_are_clamped_to_range() {
        let criteria = RubricKind::FollowUp.criteria();
        let rubrics = vec![RubricScore {
            name: "Clarity".into(),
            score: 250.0,
            reasoning: String::new(),
        }];
        assert_eq!(weighted_turn_score(criteria, &rubrics), 100.0);
    }
}
