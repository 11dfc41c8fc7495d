//! Cache-backed checkpoint saver.
//!
//! Keeps the latest snapshot per thread under a TTL. Resume only ever needs
//! the latest snapshot, so older ones are not retained; a `get` with a
//! specific checkpoint id matches only when it names the stored snapshot.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use stategraph_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointError, CheckpointSaver,
};

use crate::cache::{Cache, DEFAULT_TTL};

/// Checkpoint backend over the live-state cache.
pub struct CacheCheckpointSaver {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl CacheCheckpointSaver {
    /// Saver with the default 1 h TTL.
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            ttl: DEFAULT_TTL,
        }
    }

    /// Override the snapshot TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(thread_id: &str) -> String {
        format!("graph:checkpoint:{thread_id}")
    }
}

#[async_trait]
impl CheckpointSaver for CacheCheckpointSaver {
    async fn put(&self, config: &CheckpointConfig, checkpoint: Checkpoint) -> stategraph_checkpoint::Result<()> {
        let value = serde_json::to_value(&checkpoint)?;
        self.cache
            .set_json(&Self::key(&config.thread_id), &value, Some(self.ttl))
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))
    }

    async fn get(&self, config: &CheckpointConfig) -> stategraph_checkpoint::Result<Option<Checkpoint>> {
        let raw = self
            .cache
            .get_json(&Self::key(&config.thread_id))
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let checkpoint: Checkpoint = serde_json::from_value(raw)?;
        match &config.checkpoint_id {
            Some(id) if id != &checkpoint.id => Ok(None),
            _ => Ok(Some(checkpoint)),
        }
    }

    async fn delete_thread(&self, thread_id: &str) -> stategraph_checkpoint::Result<()> {
        self.cache
            .delete(&Self::key(thread_id))
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(())
    }
}
