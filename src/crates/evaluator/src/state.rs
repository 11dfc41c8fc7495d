//! The shared session state record and its merge schema.
//!
//! Every node reads the full state and returns a partial update. The schema
//! declares the non-default merges: the message envelope list appends, the
//! per-turn score/evaluation maps union, and the two token counters add
//! componentwise (so they never decrease for the life of the session).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use llm::TokenUsage;
use stategraph_core::state::{AppendReducer, MergeReducer, StateSchema, TokenSumReducer};
use stategraph_core::ChatMessage;

use crate::enums::{GuideStrategy, IntentStatus, RequestType, WriterStatus};
use crate::problem::ProblemContext;

/// Final aggregated submission scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalScores {
    /// Mean of holistic flow and aggregate turn score.
    pub prompt_score: f64,
    /// Code performance score.
    pub performance_score: f64,
    /// Code correctness score.
    pub correctness_score: f64,
    /// `0.25·prompt + 0.25·performance + 0.50·correctness`.
    pub total_score: f64,
    /// Letter grade (A ≥90, B ≥80, C ≥70, D ≥60, else F).
    pub grade: String,
}

/// Outcome of the sandboxed execution, shared between the performance and
/// correctness nodes so the code runs once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeExecution {
    /// Test cases passed.
    pub passed: u32,
    /// Test cases run.
    pub total: u32,
    /// Slowest case wall time, seconds.
    pub execution_time: f64,
    /// Peak memory, KB.
    pub memory_used_kb: u64,
    /// Sandbox status label.
    pub status: String,
    /// Set when execution was skipped and scoring fell back to the LLM judge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Judge task id, for retrieving the per-case result record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// The in-flight graph state for one session.
///
/// Stored in the cache between requests and merged incrementally by nodes.
/// Every field is defaulted so partially populated cache records load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub session_id: String,
    pub exam_id: i64,
    pub participant_id: i64,
    pub spec_id: i64,

    pub messages: Vec<ChatMessage>,
    pub current_turn: u32,
    pub human_message: String,
    pub ai_message: Option<String>,

    pub intent_status: Option<IntentStatus>,
    pub is_guardrail_failed: bool,
    pub guardrail_message: Option<String>,
    pub guide_strategy: Option<GuideStrategy>,
    pub keywords: Vec<String>,
    pub request_type: Option<RequestType>,

    pub writer_status: Option<WriterStatus>,
    pub writer_error: Option<String>,

    pub is_submitted: bool,
    pub code_content: Option<String>,
    pub code_language: Option<String>,

    pub problem_context: Option<ProblemContext>,

    /// Turn → `{turn_score}` produced by the evaluation guard.
    pub turn_scores: BTreeMap<String, Value>,
    /// Turn → `{final_reasoning, rubrics}`.
    pub turn_evaluations: BTreeMap<String, Value>,

    pub holistic_flow_score: Option<f64>,
    pub holistic_flow_analysis: Option<String>,
    pub aggregate_turn_score: Option<f64>,
    pub code_performance_score: Option<f64>,
    pub code_correctness_score: Option<f64>,
    pub code_execution: Option<CodeExecution>,
    pub final_scores: Option<FinalScores>,

    pub memory_summary: Option<String>,
    /// Number of leading messages covered by `memory_summary`.
    pub memory_summarized_upto: usize,

    pub error_message: Option<String>,
    pub retry_count: u32,

    pub chat_tokens: TokenUsage,
    pub eval_tokens: TokenUsage,
}

impl SessionState {
    /// Deserialize the JSON state record; unknown fields are ignored and
    /// missing fields default.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// Serialize back to the JSON record.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Contents of the most recent `turns` turn pairs, oldest first.
    pub fn recent_contents(&self, turns: usize) -> Vec<String> {
        let take = turns * 2;
        let start = self.messages.len().saturating_sub(take);
        self.messages[start..]
            .iter()
            .map(|m| m.content.clone())
            .collect()
    }

    /// Locate the `(user, ai)` contents of a turn by envelope tags.
    pub fn find_turn_pair(&self, turn: u32) -> (Option<String>, Option<String>) {
        let mut user = None;
        let mut ai = None;
        for msg in &self.messages {
            if msg.turn == Some(turn) {
                match msg.role {
                    stategraph_core::MessageRole::User => user = Some(msg.content.clone()),
                    stategraph_core::MessageRole::Assistant => ai = Some(msg.content.clone()),
                    stategraph_core::MessageRole::System => {}
                }
            }
        }
        (user, ai)
    }
}

/// The merge schema for [`SessionState`] records.
pub fn session_schema() -> StateSchema {
    let mut schema = StateSchema::new();
    schema.add_field("messages", Box::new(AppendReducer));
    schema.add_field("turn_scores", Box::new(MergeReducer));
    schema.add_field("turn_evaluations", Box::new(MergeReducer));
    schema.add_field("chat_tokens", Box::new(TokenSumReducer));
    schema.add_field("eval_tokens", Box::new(TokenSumReducer));
    schema
}

/// Build a token-usage update object, or `Null` when there is nothing to add
/// (the token-sum reducer keeps the accumulated counter on `Null`).
pub fn token_update(usage: TokenUsage) -> Value {
    if usage.is_zero() {
        Value::Null
    } else {
        serde_json::to_value(usage).unwrap_or(Value::Null)
    }
}

/// Convenience constructor for partial updates.
pub fn update(entries: Vec<(&str, Value)>) -> Value {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert(key.to_string(), value);
    }
    Value::Object(map)
}
