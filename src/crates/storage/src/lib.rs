//! Dual persistence: durable store + live-state cache.
//!
//! The durable store (sqlx/SQLite) owns sessions, messages, evaluations, and
//! submissions — everything that must survive the exam. The cache owns the
//! fast-moving session state: the graph state record, per-turn logs, turn
//! mappings, queue payloads, and checkpoints, all TTL-bounded.
//!
//! Write-order invariant: durable writes happen first; cache writes follow
//! and are advisory (a cache failure after a durable write is logged, never
//! fatal — the cache is rebuilt on the next load). The reverse order is
//! forbidden.

pub mod cache;
pub mod checkpoint;
pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod state_repo;

pub use cache::{Cache, MemoryCache};
pub use checkpoint::CacheCheckpointSaver;
pub use db::Database;
pub use error::{StorageError, Result};
pub use models::{
    EvaluationType, MessageRole, PromptEvaluation, PromptMessage, PromptSession, ScoreRow,
    SubmissionRow, SubmissionRunRow,
};
pub use repositories::{EvaluationRepository, SessionRepository, SubmissionRepository};
pub use state_repo::StateRepository;
