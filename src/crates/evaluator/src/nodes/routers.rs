//! Conditional-edge routers.
//!
//! Routers are pure functions of the post-node state. Each returns a typed
//! route variant whose key is looked up in the edge's declared branch table,
//! so the set of possible destinations is visible at graph-construction
//! time.

use serde_json::Value;

use crate::enums::{IntentStatus, WriterStatus};
use crate::state::SessionState;

const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Destinations after the intent analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentRoute {
    Writer,
    HandleFailure,
    SummarizeMemory,
    HandleRequest,
    EvalTurnGuard,
}

impl IntentRoute {
    /// Branch-table key.
    pub fn as_key(&self) -> &'static str {
        match self {
            IntentRoute::Writer => "writer",
            IntentRoute::HandleFailure => "handle_failure",
            IntentRoute::SummarizeMemory => "summarize_memory",
            IntentRoute::HandleRequest => "handle_request",
            IntentRoute::EvalTurnGuard => "eval_turn_guard",
        }
    }
}

/// Destinations after the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterRoute {
    End,
    HandleFailure,
    SummarizeMemory,
    HandleRequest,
}

impl WriterRoute {
    /// Branch-table key.
    pub fn as_key(&self) -> &'static str {
        match self {
            WriterRoute::End => "end",
            WriterRoute::HandleFailure => "handle_failure",
            WriterRoute::SummarizeMemory => "summarize_memory",
            WriterRoute::HandleRequest => "handle_request",
        }
    }
}

/// Destinations of the main router (after the guard or the failure handler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainRoute {
    EvalHolisticFlow,
    HandleRequest,
    End,
}

impl MainRoute {
    /// Branch-table key.
    pub fn as_key(&self) -> &'static str {
        match self {
            MainRoute::EvalHolisticFlow => "eval_holistic_flow",
            MainRoute::HandleRequest => "handle_request",
            MainRoute::End => "end",
        }
    }
}

fn error_mentions_context(state: &SessionState) -> bool {
    state
        .error_message
        .as_deref()
        .map(|msg| {
            let msg = msg.to_lowercase();
            msg.contains("context") || msg.contains("token")
        })
        .unwrap_or(false)
}

/// Route after intent analysis.
///
/// Submissions go to the evaluation guard; safe chat and guardrail blocks go
/// to the writer (the block becomes an educational refusal); rate limits
/// re-enter the request handler up to the retry budget.
pub fn intent_route(state: &SessionState) -> IntentRoute {
    if state.is_submitted || state.intent_status == Some(IntentStatus::PassedSubmit) {
        return IntentRoute::EvalTurnGuard;
    }
    match state.intent_status {
        Some(IntentStatus::PassedHint) => IntentRoute::Writer,
        Some(IntentStatus::FailedGuardrail) => IntentRoute::Writer,
        Some(IntentStatus::FailedRateLimit) => {
            if state.retry_count < MAX_RATE_LIMIT_RETRIES {
                IntentRoute::HandleRequest
            } else {
                IntentRoute::HandleFailure
            }
        }
        _ if error_mentions_context(state) => IntentRoute::SummarizeMemory,
        _ => IntentRoute::Writer,
    }
}

/// Route after the writer.
pub fn writer_route(state: &SessionState) -> WriterRoute {
    match state.writer_status {
        Some(WriterStatus::Success) => WriterRoute::End,
        Some(WriterStatus::FailedRateLimit) => {
            if state.retry_count < MAX_RATE_LIMIT_RETRIES {
                WriterRoute::HandleRequest
            } else {
                WriterRoute::HandleFailure
            }
        }
        Some(WriterStatus::FailedThreshold) => WriterRoute::SummarizeMemory,
        _ => WriterRoute::HandleFailure,
    }
}

/// Route after the evaluation guard or the failure handler.
pub fn main_route(state: &SessionState) -> MainRoute {
    if state.is_submitted {
        return MainRoute::EvalHolisticFlow;
    }
    if state.intent_status == Some(IntentStatus::FailedRateLimit)
        && state.retry_count < MAX_RATE_LIMIT_RETRIES
    {
        return MainRoute::HandleRequest;
    }
    MainRoute::End
}

/// Raw-state adapters for the conditional-edge tables.
pub fn intent_router(state: &Value) -> String {
    SessionState::from_value(state)
        .map(|s| intent_route(&s))
        .unwrap_or(IntentRoute::HandleFailure)
        .as_key()
        .to_string()
}

/// See [`writer_route`].
pub fn writer_router(state: &Value) -> String {
    SessionState::from_value(state)
        .map(|s| writer_route(&s))
        .unwrap_or(WriterRoute::HandleFailure)
        .as_key()
        .to_string()
}

/// See [`main_route`].
pub fn main_router(state: &Value) -> String {
    SessionState::from_value(state)
        .map(|s| main_route(&s))
        .unwrap_or(MainRoute::End)
        .as_key()
        .to_string()
}
