//! Graph nodes.
//!
//! Every node consumes the shared state and returns a partial update map.
//! Recoverable failures go into the update as `error_message` / status
//! fields — routers treat them as first-class input; only infrastructure
//! failures error out of a node.

pub mod eval_guard;
pub mod handle_request;
pub mod holistic;
pub mod intent;
pub mod routers;
pub mod system;
pub mod turn_eval;
pub mod writer;

pub use eval_guard::eval_turn_guard;
pub use handle_request::handle_request;
pub use holistic::{
    aggregate_final_scores, aggregate_turn_scores, eval_code_correctness, eval_code_performance,
    eval_holistic_flow,
};
pub use intent::intent_analyzer;
pub use routers::{intent_router, main_router, writer_router};
pub use system::{handle_failure, summarize_memory};
pub use turn_eval::TurnEvaluator;
pub use writer::writer;
