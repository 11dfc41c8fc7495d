//! Checkpoint data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies where a checkpoint lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Execution thread the checkpoint belongs to (usually the session id).
    pub thread_id: String,
    /// Specific snapshot id; `None` addresses the latest snapshot.
    pub checkpoint_id: Option<String>,
}

impl CheckpointConfig {
    /// Address the latest checkpoint of a thread.
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_id: None,
        }
    }

    /// Address a specific checkpoint.
    pub fn with_checkpoint_id(mut self, id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(id.into());
        self
    }
}

/// A serialized state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Snapshot identity within its thread.
    pub id: String,
    /// Serialized graph state at the node boundary.
    pub values: Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a snapshot stamped with the current time.
    pub fn new(id: impl Into<String>, values: Value) -> Self {
        Self {
            id: id.into(),
            values,
            created_at: Utc::now(),
        }
    }
}
