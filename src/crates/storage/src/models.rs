//! Row types for the durable store.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Message author role as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    /// Participant message.
    User,
    /// Tutor reply.
    Ai,
}

impl MessageRole {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "USER",
            MessageRole::Ai => "AI",
        }
    }

    /// Parse a stored or wire representation; anything unrecognized is USER.
    pub fn parse(value: &str) -> Self {
        match value.to_uppercase().as_str() {
            "AI" | "ASSISTANT" => MessageRole::Ai,
            _ => MessageRole::User,
        }
    }
}

/// Evaluation record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationType {
    /// Per-turn prompt-quality evaluation.
    TurnEval,
    /// Cross-turn chaining evaluation.
    HolisticFlow,
    /// Code performance evaluation.
    HolisticPerformance,
}

impl EvaluationType {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationType::TurnEval => "TURN_EVAL",
            EvaluationType::HolisticFlow => "HOLISTIC_FLOW",
            EvaluationType::HolisticPerformance => "HOLISTIC_PERFORMANCE",
        }
    }
}

/// One chat session.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PromptSession {
    pub id: i64,
    pub exam_id: i64,
    pub participant_id: i64,
    pub spec_id: Option<i64>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub total_tokens: i64,
}

impl PromptSession {
    /// A session is open while it has no terminal timestamp.
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// One stored message.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PromptMessage {
    pub id: i64,
    pub session_id: i64,
    pub turn: i64,
    pub role: String,
    pub content: String,
    pub token_count: i64,
    pub meta: Option<String>,
    pub created_at: String,
}

/// One evaluation record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PromptEvaluation {
    pub id: i64,
    pub session_id: i64,
    pub turn: Option<i64>,
    pub evaluation_type: String,
    pub node_name: Option<String>,
    pub score: Option<f64>,
    pub analysis: Option<String>,
    pub details: Option<String>,
    pub created_at: String,
}

/// One code submission.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubmissionRow {
    pub id: i64,
    pub exam_id: i64,
    pub participant_id: i64,
    pub spec_id: Option<i64>,
    pub session_id: Option<i64>,
    pub code: String,
    pub language: String,
    pub status: String,
    pub created_at: String,
}

/// Per-test verdict of a submission.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubmissionRunRow {
    pub id: i64,
    pub submission_id: i64,
    pub test_index: i64,
    pub verdict: String,
    pub execution_time: f64,
    pub memory_used: i64,
}

/// Final score of a submission.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScoreRow {
    pub id: i64,
    pub submission_id: i64,
    pub prompt_score: Option<f64>,
    pub performance_score: Option<f64>,
    pub correctness_score: Option<f64>,
    pub total_score: Option<f64>,
    pub grade: Option<String>,
    pub rubric: Option<String>,
    pub created_at: String,
}
