//! Storage backend trait.

use async_trait::async_trait;

use crate::checkpoint::{Checkpoint, CheckpointConfig};
use crate::error::Result;

/// Checkpoint storage backend.
///
/// The runtime calls [`put`](Self::put) after every node and
/// [`latest`](Self::latest) before the first node of a resumed invocation.
/// Backends decide retention: the in-memory saver keeps the full history,
/// cache-backed savers typically keep the latest snapshot under a TTL.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Store a snapshot. When `config.checkpoint_id` is `None` the
    /// checkpoint's own id is used.
    async fn put(&self, config: &CheckpointConfig, checkpoint: Checkpoint) -> Result<()>;

    /// Fetch a snapshot. `checkpoint_id = None` addresses the latest.
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>>;

    /// The most recent snapshot of a thread, if any.
    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        self.get(&CheckpointConfig::for_thread(thread_id)).await
    }

    /// Drop every snapshot of a thread.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}
