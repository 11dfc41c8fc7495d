//! In-memory checkpoint backend for tests and single-process runs.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::checkpoint::{Checkpoint, CheckpointConfig};
use crate::error::Result;
use crate::traits::CheckpointSaver;

/// Keeps the full checkpoint history per thread in process memory.
#[derive(Default)]
pub struct InMemoryCheckpointSaver {
    threads: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointSaver {
    /// Create an empty saver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots held for a thread.
    pub fn history_len(&self, thread_id: &str) -> usize {
        self.threads
            .read()
            .get(thread_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn put(&self, config: &CheckpointConfig, checkpoint: Checkpoint) -> Result<()> {
        let mut threads = self.threads.write();
        let history = threads.entry(config.thread_id.clone()).or_default();
        // Same-id puts replace in place so a step retried after resume does
        // not duplicate history.
        if let Some(existing) = history.iter_mut().find(|c| c.id == checkpoint.id) {
            *existing = checkpoint;
        } else {
            history.push(checkpoint);
        }
        Ok(())
    }

    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        let threads = self.threads.read();
        let history = match threads.get(&config.thread_id) {
            Some(history) => history,
            None => return Ok(None),
        };
        let found = match &config.checkpoint_id {
            Some(id) => history.iter().find(|c| &c.id == id),
            None => history.last(),
        };
        Ok(found.cloned())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.threads.write().remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_and_get_latest() {
        let saver = InMemoryCheckpointSaver::new();
        let config = CheckpointConfig::for_thread("t1");

        saver
            .put(&config, Checkpoint::new("step-1", json!({"n": 1})))
            .await
            .unwrap();
        saver
            .put(&config, Checkpoint::new("step-2", json!({"n": 2})))
            .await
            .unwrap();

        let latest = saver.latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.id, "step-2");
        assert_eq!(latest.values["n"], 2);
        assert_eq!(saver.history_len("t1"), 2);
    }

    #[tokio::test]
    async fn get_specific_checkpoint() {
        let saver = InMemoryCheckpointSaver::new();
        let config = CheckpointConfig::for_thread("t1");
        saver
            .put(&config, Checkpoint::new("step-1", json!({"n": 1})))
            .await
            .unwrap();
        saver
            .put(&config, Checkpoint::new("step-2", json!({"n": 2})))
            .await
            .unwrap();

        let specific = saver
            .get(&config.clone().with_checkpoint_id("step-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(specific.values["n"], 1);
    }

    #[tokio::test]
    async fn same_id_put_replaces() {
        let saver = InMemoryCheckpointSaver::new();
        let config = CheckpointConfig::for_thread("t1");
        saver
            .put(&config, Checkpoint::new("step-1", json!({"n": 1})))
            .await
            .unwrap();
        saver
            .put(&config, Checkpoint::new("step-1", json!({"n": 9})))
            .await
            .unwrap();

        assert_eq!(saver.history_len("t1"), 1);
        let latest = saver.latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.values["n"], 9);
    }

    #[tokio::test]
    async fn threads_are_isolated() {
        let saver = InMemoryCheckpointSaver::new();
        saver
            .put(
                &CheckpointConfig::for_thread("a"),
                Checkpoint::new("s", json!({"who": "a"})),
            )
            .await
            .unwrap();

        assert!(saver.latest("b").await.unwrap().is_none());
        saver.delete_thread("a").await.unwrap();
        assert!(saver.latest("a").await.unwrap().is_none());
    }
}
