//! Checkpoint persistence for graph execution threads.
//!
//! A checkpoint is a snapshot of the shared state at a node boundary, keyed
//! by the execution thread (usually the session id). The [`CheckpointSaver`]
//! trait abstracts the backend: the in-memory implementation here serves
//! tests and single-process deployments, while production attaches a
//! cache-backed implementation with TTL semantics.
//!
//! Implementations must be `Send + Sync` and safe under concurrent threads;
//! each `thread_id` maintains an independent checkpoint history.

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod traits;

pub use checkpoint::{Checkpoint, CheckpointConfig};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use traits::CheckpointSaver;
