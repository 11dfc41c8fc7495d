//! Evaluation orchestration engine.
//!
//! The domain layer of the coding-exam evaluator: the shared
//! [`SessionState`] record and its merge schema, the two-layer
//! intent/guardrail classifier, the Socratic writer, the per-turn
//! prompt-quality evaluator (a subgraph), the submission-time batch guard,
//! the holistic chaining/code evaluators, and the main graph wiring them
//! together.
//!
//! Chat path: `handle_request → intent_analyzer → writer → END`.
//! Submit path: `handle_request → intent_analyzer → eval_turn_guard →
//! eval_holistic_flow → aggregate_turn_scores → eval_code_performance →
//! eval_code_correctness → aggregate_final_scores → END`.

pub mod context;
pub mod enums;
pub mod graph;
pub mod guardrail;
pub mod metrics;
pub mod nodes;
pub mod problem;
pub mod prompts;
pub mod state;

pub use context::EvaluatorContext;
pub use enums::{
    BlockReason, CodeIntentType, GuideStrategy, IntentStatus, RequestType, SafetyStatus,
    WriterStatus,
};
pub use graph::{build_main_graph, initial_state};
pub use problem::{ProblemContext, ProblemRegistry, ProblemSource};
pub use prompts::PromptRegistry;
pub use state::{CodeExecution, FinalScores, SessionState};
