//! Queue-borne task and result types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One test case carried by a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeTestCase {
    /// stdin for the run.
    pub input: String,
    /// Expected stdout (trailing whitespace insignificant).
    pub expected: String,
}

/// Code execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeTask {
    /// Globally unique task id.
    pub task_id: String,
    /// Source code to run.
    pub code: String,
    /// Language name (mapped to a sandbox language id).
    pub language: String,
    /// Test cases to run the code against.
    pub test_cases: Vec<JudgeTestCase>,
    /// CPU time limit per case, seconds.
    pub cpu_time_limit: u32,
    /// Memory limit, MB.
    pub memory_limit: u32,
    /// Free-form metadata (session, submission id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl JudgeTask {
    /// Task with a fresh uuid and default limits (5 s / 128 MB).
    pub fn new(code: impl Into<String>, language: impl Into<String>, test_cases: Vec<JudgeTestCase>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            code: code.into(),
            language: language.into(),
            test_cases,
            cpu_time_limit: 5,
            memory_limit: 128,
            meta: None,
        }
    }

    /// Override the execution limits.
    pub fn with_limits(mut self, cpu_time_limit: u32, memory_limit: u32) -> Self {
        self.cpu_time_limit = cpu_time_limit;
        self.memory_limit = memory_limit;
        self
    }

    /// Attach metadata.
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Terminal outcome classification of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeStatus {
    /// Every case ran and passed.
    Success,
    /// A case exceeded the time limit.
    Timeout,
    /// Wrong answer, runtime error, or infrastructure failure.
    Error,
    /// A case exceeded the memory limit.
    MemoryLimit,
}

/// Task lifecycle state in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Enqueued, not picked up yet.
    Pending,
    /// A worker is executing it.
    Processing,
    /// Finished with a success result.
    Completed,
    /// Finished with a non-success result.
    Failed,
    /// Not known to the queue.
    Unknown,
}

impl TaskStatus {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Unknown => "unknown",
        }
    }

    /// Parse a stored representation.
    pub fn parse(value: &str) -> Self {
        match value {
            "pending" => TaskStatus::Pending,
            "processing" => TaskStatus::Processing,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Unknown,
        }
    }

    /// True for `completed` and `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Per-test outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseOutcome {
    /// Index of the test case within the task.
    pub index: usize,
    /// Whether the actual output matched the expected output.
    pub passed: bool,
    /// Wall time of the run, seconds.
    pub time: f64,
    /// Memory used, KB.
    pub memory_kb: u64,
    /// Sandbox status description.
    pub status: String,
    /// Actual stdout (trimmed).
    pub stdout: String,
    /// stderr, when produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// Execution result written back to the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeResult {
    /// Id of the task this result answers.
    pub task_id: String,
    /// Outcome classification.
    pub status: JudgeStatus,
    /// Aggregated output blob (one line per case).
    pub stdout: String,
    /// Error description for non-success outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Slowest case wall time, seconds.
    pub execution_time: f64,
    /// Peak memory across cases, bytes.
    pub memory_used: u64,
    /// Process-style exit code (0 on success).
    pub exit_code: i32,
    /// Per-case verdicts; empty when the sandbox gave no case detail.
    #[serde(default)]
    pub cases: Vec<CaseOutcome>,
}

impl JudgeResult {
    /// An infrastructure-error result for a task.
    pub fn infrastructure_error(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: JudgeStatus::Error,
            stdout: String::new(),
            stderr: Some(message.into()),
            execution_time: 0.0,
            memory_used: 0,
            exit_code: 1,
            cases: Vec::new(),
        }
    }

    /// Cases that passed.
    pub fn passed_count(&self) -> usize {
        self.cases.iter().filter(|c| c.passed).count()
    }

    /// Total case count.
    pub fn total_cases(&self) -> usize {
        self.cases.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_unique() {
        let a = JudgeTask::new("code", "python", vec![]);
        let b = JudgeTask::new("code", "python", vec![]);
        assert_ne!(a.task_id, b.task_id);
    }

    #[test]
    fn result_roundtrips_with_cases() {
        let result = JudgeResult {
            task_id: "t".into(),
            status: JudgeStatus::Success,
            stdout: "Test 1: Accepted".into(),
            stderr: None,
            execution_time: 0.42,
            memory_used: 10_240,
            exit_code: 0,
            cases: vec![CaseOutcome {
                index: 0,
                passed: true,
                time: 0.42,
                memory_kb: 10,
                status: "Accepted".into(),
                stdout: "42".into(),
                stderr: None,
            }],
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: JudgeResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.passed_count(), 1);
        assert_eq!(back.status, JudgeStatus::Success);
    }

    #[test]
    fn status_transitions_parse() {
        assert_eq!(TaskStatus::parse("processing"), TaskStatus::Processing);
        assert_eq!(TaskStatus::parse("garbage"), TaskStatus::Unknown);
        assert!(TaskStatus::Completed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }
}
