//! Judge worker loop.
//!
//! Pulls tasks from the queue, runs them in the sandbox, and writes results
//! back. A sandbox failure still writes an error result so the submitter's
//! poll loop is never left hanging. Runs co-resident with the API server on
//! the memory queue, or as its own process on the cache queue.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::queue::JudgeQueue;
use crate::sandbox::Sandbox;
use crate::types::{JudgeResult, TaskStatus};

const IDLE_BACKOFF: Duration = Duration::from_millis(100);

/// Background code-execution worker.
pub struct JudgeWorker {
    queue: Arc<dyn JudgeQueue>,
    sandbox: Arc<dyn Sandbox>,
    shutdown: watch::Receiver<bool>,
}

impl JudgeWorker {
    /// Build a worker. The returned sender stops the loop when set to `true`.
    pub fn new(
        queue: Arc<dyn JudgeQueue>,
        sandbox: Arc<dyn Sandbox>,
    ) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                queue,
                sandbox,
                shutdown: rx,
            },
            tx,
        )
    }

    /// Spawn the worker onto the runtime.
    pub fn spawn(
        queue: Arc<dyn JudgeQueue>,
        sandbox: Arc<dyn Sandbox>,
    ) -> (JoinHandle<()>, watch::Sender<bool>) {
        let (worker, shutdown) = Self::new(queue, sandbox);
        (tokio::spawn(worker.run()), shutdown)
    }

    /// Run until shutdown is signalled.
    pub async fn run(mut self) {
        info!("judge worker started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let task = tokio::select! {
                task = self.queue.dequeue() => task,
                _ = self.shutdown.changed() => continue,
            };

            let task = match task {
                Ok(Some(task)) => task,
                Ok(None) => {
                    tokio::time::sleep(IDLE_BACKOFF).await;
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "queue dequeue failed");
                    tokio::time::sleep(IDLE_BACKOFF).await;
                    continue;
                }
            };

            let task_id = task.task_id.clone();
            info!(task_id = %task_id, cases = task.test_cases.len(), "task picked up");
            if let Err(e) = self.queue.set_status(&task_id, TaskStatus::Processing).await {
                error!(task_id = %task_id, error = %e, "status update failed");
            }

            let result = match self.sandbox.execute(&task).await {
                Ok(result) => result,
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "sandbox execution failed");
                    JudgeResult::infrastructure_error(&task_id, e.to_string())
                }
            };

            match self.queue.save_result(&task_id, result).await {
                Ok(()) => info!(task_id = %task_id, "result saved"),
                Err(e) => error!(task_id = %task_id, error = %e, "result save failed"),
            }
        }
        info!("judge worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::sandbox::MockSandbox;
    use crate::types::{JudgeStatus, JudgeTask, JudgeTestCase};
    use async_trait::async_trait;

    fn task() -> JudgeTask {
        JudgeTask::new(
            "print(1)",
            "python",
            vec![JudgeTestCase {
                input: String::new(),
                expected: "1".into(),
            }],
        )
    }

    async fn wait_terminal(queue: &MemoryQueue, task_id: &str) -> TaskStatus {
        for _ in 0..100 {
            let status = queue.get_status(task_id).await.unwrap();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never reached a terminal status");
    }

    #[tokio::test]
    async fn worker_processes_enqueued_task() {
        let queue = Arc::new(MemoryQueue::new());
        let (handle, shutdown) =
            JudgeWorker::spawn(queue.clone(), Arc::new(MockSandbox::passing()));

        let task_id = queue.enqueue(task()).await.unwrap();
        let status = wait_terminal(&queue, &task_id).await;
        assert_eq!(status, TaskStatus::Completed);

        let result = queue.get_result(&task_id).await.unwrap().unwrap();
        assert_eq!(result.status, JudgeStatus::Success);

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    struct ExplodingSandbox;

    #[async_trait]
    impl Sandbox for ExplodingSandbox {
        async fn execute(&self, _task: &JudgeTask) -> crate::Result<JudgeResult> {
            Err(crate::JudgeError::Sandbox("sandbox unreachable".into()))
        }
    }

    #[tokio::test]
    async fn sandbox_failure_still_writes_error_result() {
        let queue = Arc::new(MemoryQueue::new());
        let (handle, shutdown) = JudgeWorker::spawn(queue.clone(), Arc::new(ExplodingSandbox));

        let task_id = queue.enqueue(task()).await.unwrap();
        let status = wait_terminal(&queue, &task_id).await;
        assert_eq!(status, TaskStatus::Failed);

        let result = queue.get_result(&task_id).await.unwrap().unwrap();
        assert_eq!(result.status, JudgeStatus::Error);
        assert!(result.stderr.unwrap().contains("sandbox unreachable"));

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }
}
