//! Judge queue adapters.
//!
//! Two adapters share one interface: [`MemoryQueue`] for tests and
//! co-resident deployments, [`CacheQueue`] over the cache's list primitive
//! for multi-process runs. Status transitions proceed strictly
//! `pending → processing → (completed | failed)`.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use storage::Cache;

use crate::error::{JudgeError, Result};
use crate::types::{JudgeResult, JudgeStatus, JudgeTask, TaskStatus};

const RESULT_TTL: Duration = Duration::from_secs(3600);

/// Queue interface shared by the evaluator (enqueue + poll) and the worker
/// (dequeue + write-back).
#[async_trait]
pub trait JudgeQueue: Send + Sync {
    /// Add a task; returns its id with status `pending`.
    async fn enqueue(&self, task: JudgeTask) -> Result<String>;

    /// Take the next task, marking it `processing`. `None` when the queue is
    /// empty (adapters may block briefly while waiting).
    async fn dequeue(&self) -> Result<Option<JudgeTask>>;

    /// Current lifecycle status of a task.
    async fn get_status(&self, task_id: &str) -> Result<TaskStatus>;

    /// Force a lifecycle status.
    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    /// Write the result and the matching terminal status.
    async fn save_result(&self, task_id: &str, result: JudgeResult) -> Result<()>;

    /// Read the result, if present.
    async fn get_result(&self, task_id: &str) -> Result<Option<JudgeResult>>;
}

/// In-process FIFO queue.
#[derive(Default)]
pub struct MemoryQueue {
    queue: Mutex<VecDeque<JudgeTask>>,
    status: DashMap<String, TaskStatus>,
    results: DashMap<String, JudgeResult>,
}

impl MemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending tasks.
    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Whether no task is pending.
    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }
}

#[async_trait]
impl JudgeQueue for MemoryQueue {
    async fn enqueue(&self, task: JudgeTask) -> Result<String> {
        let task_id = task.task_id.clone();
        self.status.insert(task_id.clone(), TaskStatus::Pending);
        self.queue.lock().await.push_back(task);
        Ok(task_id)
    }

    async fn dequeue(&self) -> Result<Option<JudgeTask>> {
        let task = self.queue.lock().await.pop_front();
        if let Some(task) = &task {
            self.status
                .insert(task.task_id.clone(), TaskStatus::Processing);
        }
        Ok(task)
    }

    async fn get_status(&self, task_id: &str) -> Result<TaskStatus> {
        Ok(self
            .status
            .get(task_id)
            .map(|s| *s)
            .unwrap_or(TaskStatus::Unknown))
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.status.insert(task_id.to_string(), status);
        Ok(())
    }

    async fn save_result(&self, task_id: &str, result: JudgeResult) -> Result<()> {
        let status = if result.status == JudgeStatus::Success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.results.insert(task_id.to_string(), result);
        self.status.insert(task_id.to_string(), status);
        Ok(())
    }

    async fn get_result(&self, task_id: &str) -> Result<Option<JudgeResult>> {
        Ok(self.results.get(task_id).map(|r| r.clone()))
    }
}

/// Queue over the cache's list primitive.
///
/// Pending tasks live in the `judge_queue:pending` list; status and result
/// records live under `judge_status:{id}` / `judge_result:{id}` with a 1 h
/// TTL. `dequeue` blocks on the list for up to one second.
pub struct CacheQueue {
    cache: Arc<dyn Cache>,
}

impl CacheQueue {
    const PENDING_KEY: &'static str = "judge_queue:pending";

    /// Queue over the given cache.
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    fn status_key(task_id: &str) -> String {
        format!("judge_status:{task_id}")
    }

    fn result_key(task_id: &str) -> String {
        format!("judge_result:{task_id}")
    }

    fn cache_err(e: storage::StorageError) -> JudgeError {
        JudgeError::Queue(e.to_string())
    }
}

#[async_trait]
impl JudgeQueue for CacheQueue {
    async fn enqueue(&self, task: JudgeTask) -> Result<String> {
        let task_id = task.task_id.clone();
        let payload = serde_json::to_string(&task)?;
        self.cache
            .lpush(Self::PENDING_KEY, &payload)
            .await
            .map_err(Self::cache_err)?;
        self.set_status(&task_id, TaskStatus::Pending).await?;
        Ok(task_id)
    }

    async fn dequeue(&self) -> Result<Option<JudgeTask>> {
        let popped = self
            .cache
            .brpop(Self::PENDING_KEY, Duration::from_secs(1))
            .await
            .map_err(Self::cache_err)?;
        let Some(payload) = popped else {
            return Ok(None);
        };
        let task: JudgeTask = serde_json::from_str(&payload)?;
        self.set_status(&task.task_id, TaskStatus::Processing).await?;
        Ok(Some(task))
    }

    async fn get_status(&self, task_id: &str) -> Result<TaskStatus> {
        let raw = self
            .cache
            .get(&Self::status_key(task_id))
            .await
            .map_err(Self::cache_err)?;
        Ok(raw
            .map(|s| TaskStatus::parse(&s))
            .unwrap_or(TaskStatus::Unknown))
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.cache
            .set(&Self::status_key(task_id), status.as_str(), Some(RESULT_TTL))
            .await
            .map_err(Self::cache_err)
    }

    async fn save_result(&self, task_id: &str, result: JudgeResult) -> Result<()> {
        let status = if result.status == JudgeStatus::Success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let payload = serde_json::to_string(&result)?;
        self.cache
            .set(&Self::result_key(task_id), &payload, Some(RESULT_TTL))
            .await
            .map_err(Self::cache_err)?;
        self.set_status(task_id, status).await
    }

    async fn get_result(&self, task_id: &str) -> Result<Option<JudgeResult>> {
        let raw = self
            .cache
            .get(&Self::result_key(task_id))
            .await
            .map_err(Self::cache_err)?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}
