//! Code execution subsystem.
//!
//! A submission's code runs through three pieces: the [`queue`] carries
//! [`JudgeTask`]s from the evaluator to the worker; the [`worker`] pulls
//! tasks, drives the [`sandbox`], and writes results back; the sandbox
//! adapter talks to a Judge0-shaped execution service.
//!
//! The waiter polls the queue for the task's status/result; the worker
//! guarantees that even an internal failure writes an error result, so the
//! waiter's poll loop always terminates inside its own cap.

pub mod error;
pub mod queue;
pub mod sandbox;
pub mod types;
pub mod worker;

pub use error::{JudgeError, Result};
pub use queue::{CacheQueue, JudgeQueue, MemoryQueue};
pub use sandbox::{Judge0Sandbox, MockSandbox, Sandbox};
pub use types::{CaseOutcome, JudgeResult, JudgeStatus, JudgeTask, JudgeTestCase, TaskStatus};
pub use worker::JudgeWorker;
