//! Sandbox adapters.
//!
//! [`Judge0Sandbox`] talks to a Judge0-shaped execution service: submit the
//! code with a case's stdin, poll the submission token until it leaves the
//! queue, and fold the per-case outcomes into one [`JudgeResult`].
//! [`MockSandbox`] scripts outcomes for tests.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::{JudgeError, Result};
use crate::types::{CaseOutcome, JudgeResult, JudgeStatus, JudgeTask};

/// Executes a task and produces its result.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run every test case of the task.
    async fn execute(&self, task: &JudgeTask) -> Result<JudgeResult>;
}

/// Judge0 status ids: 1 queued, 2 processing, 3 accepted, 4 wrong answer,
/// 5 time limit, 6 compile error, >=7 runtime/internal errors.
const STATUS_ACCEPTED: i64 = 3;
const STATUS_TIME_LIMIT: i64 = 5;

/// Judge0 API client.
pub struct Judge0Sandbox {
    api_url: String,
    api_key: Option<String>,
    client: Client,
    poll_interval: Duration,
    max_wait: Duration,
}

impl Judge0Sandbox {
    /// Client for a Judge0 endpoint; `api_key` becomes the `X-Auth-Token`
    /// header when present.
    pub fn new(api_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(JudgeError::Http)?;
        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
            poll_interval: Duration::from_millis(500),
            max_wait: Duration::from_secs(30),
        })
    }

    /// Map a language name to a Judge0 language id (defaults to Python 3).
    pub fn language_id(language: &str) -> u32 {
        match language.to_lowercase().as_str() {
            "python" | "python3" => 71,
            "java" => 62,
            "cpp" | "c++" => 54,
            "c" => 50,
            "javascript" | "js" | "nodejs" => 63,
            "go" => 60,
            "rust" => 73,
            _ => 71,
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-Auth-Token", key);
        }
        builder
    }

    /// Submit one run; returns the submission token.
    async fn submit(&self, task: &JudgeTask, stdin: &str, expected: Option<&str>) -> Result<String> {
        let mut payload = json!({
            "source_code": task.code,
            "language_id": Self::language_id(&task.language),
            "stdin": stdin,
            "cpu_time_limit": task.cpu_time_limit,
            "memory_limit": task.memory_limit * 1024,
        });
        if let Some(expected) = expected {
            payload["expected_output"] = json!(expected);
        }

        let response = self
            .request(
                reqwest::Method::POST,
                format!("{}/submissions?base64_encoded=false&wait=false", self.api_url),
            )
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        body["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| JudgeError::Sandbox(format!("no token in response: {body}")))
    }

    /// Poll a token until it leaves the queue or the wait cap expires.
    async fn wait_for_result(&self, token: &str) -> Result<Value> {
        let started = Instant::now();
        loop {
            let response = self
                .request(
                    reqwest::Method::GET,
                    format!("{}/submissions/{token}?base64_encoded=false", self.api_url),
                )
                .send()
                .await?
                .error_for_status()?;
            let body: Value = response.json().await?;
            let status_id = body["status"]["id"].as_i64().unwrap_or(0);
            if status_id >= STATUS_ACCEPTED {
                return Ok(body);
            }
            if started.elapsed() >= self.max_wait {
                warn!(token = %token, "sandbox poll cap reached");
                return Ok(body);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn run_case(&self, task: &JudgeTask, index: usize) -> Result<CaseOutcome> {
        let case = &task.test_cases[index];
        let token = self.submit(task, &case.input, Some(&case.expected)).await?;
        let body = self.wait_for_result(&token).await?;

        let status_id = body["status"]["id"].as_i64().unwrap_or(0);
        let stdout = body["stdout"].as_str().unwrap_or("").trim().to_string();
        let passed = status_id == STATUS_ACCEPTED && stdout == case.expected.trim();

        Ok(CaseOutcome {
            index,
            passed,
            time: body["time"]
                .as_str()
                .and_then(|t| t.parse().ok())
                .or_else(|| body["time"].as_f64())
                .unwrap_or(0.0),
            memory_kb: body["memory"].as_u64().unwrap_or(0),
            status: body["status"]["description"]
                .as_str()
                .unwrap_or("Unknown")
                .to_string(),
            stdout,
            stderr: body["stderr"].as_str().map(str::to_string).or_else(|| {
                body["compile_output"].as_str().map(str::to_string)
            }),
        })
    }
}

/// Fold per-case outcomes into the canonical result record.
pub fn aggregate_cases(task_id: &str, cases: Vec<CaseOutcome>) -> JudgeResult {
    let total = cases.len();
    let passed = cases.iter().filter(|c| c.passed).count();
    let timed_out = cases
        .iter()
        .any(|c| c.status.to_lowercase().contains("time limit"));

    let status = if total > 0 && passed == total {
        JudgeStatus::Success
    } else if timed_out {
        JudgeStatus::Timeout
    } else {
        JudgeStatus::Error
    };

    let mut output_lines = Vec::with_capacity(total);
    for case in &cases {
        output_lines.push(format!("Test {}: {}", case.index + 1, case.status));
        if !case.stdout.is_empty() {
            output_lines.push(format!("  Output: {}", case.stdout));
        }
        if let Some(stderr) = &case.stderr {
            output_lines.push(format!("  Error: {stderr}"));
        }
    }

    let stderr = (passed < total).then(|| {
        let first_failure = cases
            .iter()
            .find(|c| !c.passed)
            .map(|c| c.status.clone())
            .unwrap_or_else(|| "unknown failure".to_string());
        format!("{}/{} tests failed: {first_failure}", total - passed, total)
    });

    JudgeResult {
        task_id: task_id.to_string(),
        status,
        stdout: output_lines.join("\n"),
        stderr,
        execution_time: cases.iter().map(|c| c.time).fold(0.0, f64::max),
        memory_used: cases.iter().map(|c| c.memory_kb).max().unwrap_or(0) * 1024,
        exit_code: if status == JudgeStatus::Success { 0 } else { 1 },
        cases,
    }
}

#[async_trait]
impl Sandbox for Judge0Sandbox {
    async fn execute(&self, task: &JudgeTask) -> Result<JudgeResult> {
        if task.test_cases.is_empty() {
            return Err(JudgeError::Sandbox("task carries no test cases".to_string()));
        }
        let mut cases = Vec::with_capacity(task.test_cases.len());
        for index in 0..task.test_cases.len() {
            info!(task_id = %task.task_id, case = index + 1, total = task.test_cases.len(), "running test case");
            cases.push(self.run_case(task, index).await?);
        }
        Ok(aggregate_cases(&task.task_id, cases))
    }
}

/// Scripted sandbox for tests.
///
/// `pass_pattern[i % len]` decides whether case `i` passes; an empty pattern
/// fails every case. A latency can be attached to simulate slow executions.
pub struct MockSandbox {
    pass_pattern: Vec<bool>,
    case_time: f64,
    case_memory_kb: u64,
    latency: Duration,
}

impl Default for MockSandbox {
    fn default() -> Self {
        Self::passing()
    }
}

impl MockSandbox {
    /// Sandbox where every case passes quickly.
    pub fn passing() -> Self {
        Self {
            pass_pattern: vec![true],
            case_time: 0.1,
            case_memory_kb: 10_240,
            latency: Duration::ZERO,
        }
    }

    /// Sandbox with a repeating pass/fail pattern.
    pub fn with_pattern(pass_pattern: Vec<bool>) -> Self {
        Self {
            pass_pattern,
            ..Self::passing()
        }
    }

    /// Report this wall time and memory per case.
    pub fn with_resources(mut self, case_time: f64, case_memory_kb: u64) -> Self {
        self.case_time = case_time;
        self.case_memory_kb = case_memory_kb;
        self
    }

    /// Sleep this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    async fn execute(&self, task: &JudgeTask) -> Result<JudgeResult> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let cases: Vec<CaseOutcome> = task
            .test_cases
            .iter()
            .enumerate()
            .map(|(index, case)| {
                let passed = !self.pass_pattern.is_empty()
                    && self.pass_pattern[index % self.pass_pattern.len()];
                CaseOutcome {
                    index,
                    passed,
                    time: self.case_time,
                    memory_kb: self.case_memory_kb,
                    status: if passed { "Accepted" } else { "Wrong Answer" }.to_string(),
                    stdout: if passed {
                        case.expected.trim().to_string()
                    } else {
                        String::new()
                    },
                    stderr: None,
                }
            })
            .collect();
        Ok(aggregate_cases(&task.task_id, cases))
    }
}
