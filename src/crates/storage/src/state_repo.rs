//! Live session-state repository over the cache.
//!
//! Owns the cache keys for the graph state, per-turn logs, the writer's
//! turn→message-index mapping, memory summaries, final scores, and the
//! active-session pointer. Sessions are single-writer, so the
//! read-modify-write on the turn-log document is safe.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, DEFAULT_TTL};
use crate::error::Result;

/// Cache-facing repository for live session state.
#[derive(Clone)]
pub struct StateRepository {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl StateRepository {
    /// Repository with the default 1 h TTL.
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            ttl: DEFAULT_TTL,
        }
    }

    /// Override the record TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Underlying cache handle.
    pub fn cache(&self) -> Arc<dyn Cache> {
        self.cache.clone()
    }

    fn state_key(session_id: &str) -> String {
        format!("graph:state:{session_id}")
    }

    fn turn_logs_key(session_id: &str) -> String {
        format!("turn:logs:{session_id}")
    }

    fn turn_mapping_key(session_id: &str) -> String {
        format!("turn:mapping:{session_id}")
    }

    fn memory_key(session_id: &str) -> String {
        format!("memory:summary:{session_id}")
    }

    fn scores_key(session_id: &str) -> String {
        format!("eval:scores:{session_id}")
    }

    fn active_key(exam_id: i64, participant_id: i64) -> String {
        format!("session:active:{exam_id}:{participant_id}")
    }

    /// Persist the graph state.
    pub async fn save_state(&self, session_id: &str, state: &Value) -> Result<()> {
        self.cache
            .set_json(&Self::state_key(session_id), state, Some(self.ttl))
            .await
    }

    /// Load the graph state.
    pub async fn get_state(&self, session_id: &str) -> Result<Option<Value>> {
        self.cache.get_json(&Self::state_key(session_id)).await
    }

    /// Drop every cache record of a session.
    pub async fn clear_session(&self, session_id: &str) -> Result<bool> {
        let existed = self.cache.delete(&Self::state_key(session_id)).await?;
        self.cache.delete(&Self::turn_logs_key(session_id)).await?;
        self.cache.delete(&Self::turn_mapping_key(session_id)).await?;
        self.cache.delete(&Self::memory_key(session_id)).await?;
        self.cache.delete(&Self::scores_key(session_id)).await?;
        Ok(existed)
    }

    /// Store the turn log for one turn.
    pub async fn save_turn_log(&self, session_id: &str, turn: u32, log: &Value) -> Result<()> {
        let key = Self::turn_logs_key(session_id);
        let mut logs = self
            .cache
            .get_json(&key)
            .await?
            .unwrap_or_else(|| json!({}));
        logs[turn.to_string()] = log.clone();
        self.cache.set_json(&key, &logs, Some(self.ttl)).await
    }

    /// Load one turn log.
    pub async fn get_turn_log(&self, session_id: &str, turn: u32) -> Result<Option<Value>> {
        let logs = self.cache.get_json(&Self::turn_logs_key(session_id)).await?;
        Ok(logs.and_then(|logs| logs.get(turn.to_string()).cloned()))
    }

    /// All turn logs of a session, keyed by turn in ascending order.
    pub async fn get_all_turn_logs(&self, session_id: &str) -> Result<BTreeMap<u32, Value>> {
        let mut out = BTreeMap::new();
        if let Some(Value::Object(logs)) =
            self.cache.get_json(&Self::turn_logs_key(session_id)).await?
        {
            for (key, value) in logs {
                if let Ok(turn) = key.parse::<u32>() {
                    out.insert(turn, value);
                }
            }
        }
        Ok(out)
    }

    /// Record the message-index range of a turn, written by the writer node.
    pub async fn save_turn_mapping(
        &self,
        session_id: &str,
        turn: u32,
        start_msg_idx: usize,
        end_msg_idx: usize,
    ) -> Result<()> {
        let key = Self::turn_mapping_key(session_id);
        let mut mapping = self
            .cache
            .get_json(&key)
            .await?
            .unwrap_or_else(|| json!({}));
        mapping[turn.to_string()] = json!({
            "start_msg_idx": start_msg_idx,
            "end_msg_idx": end_msg_idx,
        });
        self.cache.set_json(&key, &mapping, Some(self.ttl)).await
    }

    /// Turn → (start, end) message indices.
    pub async fn get_turn_mapping(
        &self,
        session_id: &str,
    ) -> Result<BTreeMap<u32, (usize, usize)>> {
        let mut out = BTreeMap::new();
        if let Some(Value::Object(mapping)) = self
            .cache
            .get_json(&Self::turn_mapping_key(session_id))
            .await?
        {
            for (key, value) in mapping {
                let (Ok(turn), Some(start), Some(end)) = (
                    key.parse::<u32>(),
                    value.get("start_msg_idx").and_then(Value::as_u64),
                    value.get("end_msg_idx").and_then(Value::as_u64),
                ) else {
                    continue;
                };
                out.insert(turn, (start as usize, end as usize));
            }
        }
        Ok(out)
    }

    /// Store the conversation memory summary.
    pub async fn save_memory_summary(&self, session_id: &str, summary: &str) -> Result<()> {
        self.cache
            .set(&Self::memory_key(session_id), summary, Some(self.ttl))
            .await
    }

    /// Load the conversation memory summary.
    pub async fn get_memory_summary(&self, session_id: &str) -> Result<Option<String>> {
        self.cache.get(&Self::memory_key(session_id)).await
    }

    /// Store the final score record. Kept twice as long as regular records.
    pub async fn save_final_scores(&self, session_id: &str, scores: &Value) -> Result<()> {
        self.cache
            .set_json(&Self::scores_key(session_id), scores, Some(self.ttl * 2))
            .await
    }

    /// Load the final score record.
    pub async fn get_final_scores(&self, session_id: &str) -> Result<Option<Value>> {
        self.cache.get_json(&Self::scores_key(session_id)).await
    }

    /// Point `(exam, participant)` at its active session id.
    pub async fn set_active_session(
        &self,
        exam_id: i64,
        participant_id: i64,
        session_id: &str,
    ) -> Result<()> {
        self.cache
            .set(
                &Self::active_key(exam_id, participant_id),
                session_id,
                Some(self.ttl),
            )
            .await
    }

    /// Resolve the active session id of `(exam, participant)`.
    pub async fn get_active_session(
        &self,
        exam_id: i64,
        participant_id: i64,
    ) -> Result<Option<String>> {
        self.cache.get(&Self::active_key(exam_id, participant_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn repo() -> StateRepository {
        StateRepository::new(Arc::new(MemoryCache::new()))
    }

    #[tokio::test]
    async fn state_roundtrip() {
        let repo = repo();
        let state = json!({"current_turn": 2, "messages": []});
        repo.save_state("s1", &state).await.unwrap();
        assert_eq!(repo.get_state("s1").await.unwrap().unwrap(), state);
        assert!(repo.get_state("s2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn turn_logs_accumulate_and_sort() {
        let repo = repo();
        repo.save_turn_log("s1", 2, &json!({"turn_score": 70}))
            .await
            .unwrap();
        repo.save_turn_log("s1", 1, &json!({"turn_score": 90}))
            .await
            .unwrap();

        let logs = repo.get_all_turn_logs("s1").await.unwrap();
        assert_eq!(logs.len(), 2);
        let turns: Vec<u32> = logs.keys().copied().collect();
        assert_eq!(turns, vec![1, 2]);
        assert_eq!(
            repo.get_turn_log("s1", 1).await.unwrap().unwrap()["turn_score"],
            90
        );
    }

    #[tokio::test]
    async fn turn_mapping_roundtrip() {
        let repo = repo();
        repo.save_turn_mapping("s1", 1, 0, 1).await.unwrap();
        repo.save_turn_mapping("s1", 2, 2, 3).await.unwrap();

        let mapping = repo.get_turn_mapping("s1").await.unwrap();
        assert_eq!(mapping.get(&1), Some(&(0, 1)));
        assert_eq!(mapping.get(&2), Some(&(2, 3)));
    }

    #[tokio::test]
    async fn clear_session_removes_everything() {
        let repo = repo();
        repo.save_state("s1", &json!({"x": 1})).await.unwrap();
        repo.save_turn_log("s1", 1, &json!({})).await.unwrap();
        repo.save_memory_summary("s1", "summary").await.unwrap();

        assert!(repo.clear_session("s1").await.unwrap());
        assert!(repo.get_state("s1").await.unwrap().is_none());
        assert!(repo.get_all_turn_logs("s1").await.unwrap().is_empty());
        assert!(repo.get_memory_summary("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn active_session_pointer() {
        let repo = repo();
        repo.set_active_session(7, 42, "session_9").await.unwrap();
        assert_eq!(
            repo.get_active_session(7, 42).await.unwrap().as_deref(),
            Some("session_9")
        );
        assert!(repo.get_active_session(7, 43).await.unwrap().is_none());
    }
}
