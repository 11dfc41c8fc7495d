//! Orchestration service facade.
//!
//! Owns the public operations: `process_message`, `submit_code`,
//! `stream_message`, and the read-through helpers. The write-order invariant
//! lives here: the user message is durably written before the graph runs,
//! the AI message (and on submit, the submission + score rows) before the
//! response is returned; cache writes come after durable writes and are
//! advisory.

use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use evaluator::nodes::writer as writer_node;
use evaluator::{build_main_graph, initial_state, EvaluatorContext, SessionState};
use llm::{ChatRequest, TokenUsage};
use stategraph_checkpoint::CheckpointSaver;
use stategraph_core::{ChatMessage, CompiledGraph, InvokeConfig, MessageRole as CoreRole};
use storage::{
    CacheCheckpointSaver, Database, MessageRole, PromptSession, SessionRepository,
    SubmissionRepository,
};

/// Service-level errors: infrastructure and validation only. Business
/// failures (guardrails, graph errors) come back inside the response with
/// `error = true`.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Durable store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// Referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed client input.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Graph construction failure at startup.
    #[error("Graph error: {0}")]
    Graph(#[from] stategraph_core::GraphError),
}

/// Token usage section of a response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenReport {
    pub chat_tokens: TokenUsage,
    pub eval_tokens: TokenUsage,
    pub total_tokens: u64,
}

impl TokenReport {
    fn from_state(s: &SessionState) -> Self {
        Self {
            chat_tokens: s.chat_tokens,
            eval_tokens: s.eval_tokens,
            total_tokens: s.chat_tokens.total_tokens + s.eval_tokens.total_tokens,
        }
    }
}

/// Response of `process_message`.
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub session_id: i64,
    pub turn: i64,
    pub ai_message: Option<String>,
    pub is_submitted: bool,
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
    #[serde(flatten)]
    pub tokens: TokenReport,
}

/// Response of `submit_code`.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub session_id: i64,
    pub submission_id: Option<i64>,
    pub final_scores: Option<Value>,
    pub turn_scores: Option<Value>,
    pub feedback: Option<String>,
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub tokens: TokenReport,
}

/// Streamed server events, mirrored onto the WebSocket protocol.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Delta {
        content: String,
        turn_id: String,
    },
    Done {
        turn_id: String,
        full_content: String,
        chat_tokens: TokenUsage,
        eval_tokens: TokenUsage,
    },
    Cancelled {
        turn_id: String,
    },
    Error {
        turn_id: String,
        error: String,
    },
}

/// The orchestration service.
pub struct EvalService {
    graph: CompiledGraph,
    ctx: Arc<EvaluatorContext>,
    db: Database,
    checkpointer: Arc<dyn CheckpointSaver>,
    cancellations: DashMap<String, Arc<AtomicBool>>,
    chat_timeout: Duration,
    submit_timeout: Duration,
}

impl EvalService {
    /// Build the service: the checkpointer lives in the cache, keyed by the
    /// session thread.
    pub fn new(ctx: Arc<EvaluatorContext>, db: Database) -> Result<Self, ServiceError> {
        let checkpointer: Arc<dyn CheckpointSaver> =
            Arc::new(CacheCheckpointSaver::new(ctx.state_repo.cache()));
        let graph = build_main_graph(ctx.clone(), Some(checkpointer.clone()))?;
        Ok(Self {
            graph,
            ctx,
            db,
            checkpointer,
            cancellations: DashMap::new(),
            chat_timeout: Duration::from_secs(60),
            submit_timeout: Duration::from_secs(120),
        })
    }

    /// Override the chat/submit timeouts.
    pub fn with_timeouts(mut self, chat: Duration, submit: Duration) -> Self {
        self.chat_timeout = chat;
        self.submit_timeout = submit;
        self
    }

    fn session_key(session: &PromptSession) -> String {
        format!("session_{}", session.id)
    }

    async fn open_session(
        &self,
        exam_id: i64,
        participant_id: i64,
        spec_id: i64,
    ) -> Result<PromptSession, ServiceError> {
        let session =
            SessionRepository::get_or_create(self.db.pool(), exam_id, participant_id, Some(spec_id))
                .await?;
        // Advisory pointer for reconnecting clients.
        if let Err(e) = self
            .ctx
            .state_repo
            .set_active_session(exam_id, participant_id, &Self::session_key(&session))
            .await
        {
            warn!(session_id = session.id, error = %e, "active-session pointer write failed");
        }
        Ok(session)
    }

    /// Previous cumulative token totals, for the per-request session delta.
    async fn previous_token_total(&self, session_key: &str) -> u64 {
        match self.ctx.state_repo.get_state(session_key).await {
            Ok(Some(state)) => SessionState::from_value(&state)
                .map(|s| s.chat_tokens.total_tokens + s.eval_tokens.total_tokens)
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// Post-invoke bookkeeping shared by chat and submit: persist the AI
    /// message, roll the token delta onto the session, refresh the cache.
    async fn finish_invocation(
        &self,
        session: &PromptSession,
        session_key: &str,
        final_state: &Value,
        previous_total: u64,
    ) -> Result<SessionState, ServiceError> {
        let s = SessionState::from_value(final_state)
            .map_err(|e| ServiceError::InvalidRequest(format!("state corrupted: {e}")))?;

        // AI message durably before responding (write-order).
        if let Some(ai_message) = s.ai_message.as_deref().filter(|m| !m.trim().is_empty()) {
            SessionRepository::save_message(
                self.db.pool(),
                session.id,
                Some(s.current_turn as i64),
                MessageRole::Ai,
                ai_message,
                s.chat_tokens.completion_tokens as i64,
                None,
            )
            .await?;
        }

        let new_total = s.chat_tokens.total_tokens + s.eval_tokens.total_tokens;
        let delta = new_total.saturating_sub(previous_total);
        if delta > 0 {
            SessionRepository::add_tokens(self.db.pool(), session.id, delta as i64).await?;
        }

        // Cache refresh is advisory.
        if let Err(e) = self.ctx.state_repo.save_state(session_key, final_state).await {
            warn!(session_id = session.id, error = %e, "state cache write failed (continuing)");
        }

        Ok(s)
    }

    fn error_response(session: &PromptSession, e: &dyn std::fmt::Display) -> MessageResponse {
        MessageResponse {
            session_id: session.id,
            turn: 0,
            ai_message: None,
            is_submitted: false,
            error: true,
            error_message: Some(format!("processing failed: {e}")),
            error_details: Some(json!({
                "error_type": "graph_execution",
                "error_message": e.to_string(),
                "session_id": session.id,
            })),
            tokens: TokenReport::default(),
        }
    }

    /// Process one chat message through the main graph.
    pub async fn process_message(
        &self,
        exam_id: i64,
        participant_id: i64,
        spec_id: i64,
        text: &str,
    ) -> Result<MessageResponse, ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("message is empty".to_string()));
        }

        let session = self.open_session(exam_id, participant_id, spec_id).await?;
        let session_key = Self::session_key(&session);

        // User message durably before the graph runs (write-order).
        let saved = SessionRepository::save_message(
            self.db.pool(),
            session.id,
            None,
            MessageRole::User,
            text,
            0,
            None,
        )
        .await?;
        info!(session_id = session.id, turn = saved.turn, "user message stored");

        let previous_total = self.previous_token_total(&session_key).await;
        let input = request_input(&session_key, &session, spec_id, text, false, None, None);
        let config = InvokeConfig::for_thread(&session_key);

        let invocation = tokio::time::timeout(self.chat_timeout, self.graph.invoke(input, &config));
        let final_state = match invocation.await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                error!(session_id = session.id, error = %e, "graph invocation failed");
                return Ok(Self::error_response(&session, &e));
            }
            Err(_) => {
                error!(session_id = session.id, "chat flow timed out");
                return Ok(Self::error_response(&session, &"request timed out"));
            }
        };

        let s = self
            .finish_invocation(&session, &session_key, &final_state, previous_total)
            .await?;

        Ok(MessageResponse {
            session_id: session.id,
            turn: s.current_turn as i64,
            ai_message: s.ai_message.clone(),
            is_submitted: s.is_submitted,
            // Guardrail refusals are successful responses; only flows that
            // ended with an error record count as failures.
            error: s.error_message.is_some(),
            error_message: s.error_message.clone(),
            error_details: None,
            tokens: TokenReport::from_state(&s),
        })
    }

    /// Submit code for final evaluation.
    pub async fn submit_code(
        &self,
        exam_id: i64,
        participant_id: i64,
        spec_id: i64,
        code: &str,
        language: &str,
    ) -> Result<SubmitResponse, ServiceError> {
        if code.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("code is empty".to_string()));
        }

        let session = self.open_session(exam_id, participant_id, spec_id).await?;
        let session_key = Self::session_key(&session);
        let text = "Submitting final code.";

        SessionRepository::save_message(
            self.db.pool(),
            session.id,
            None,
            MessageRole::User,
            text,
            0,
            Some(&json!({"submission": true, "language": language})),
        )
        .await?;

        let previous_total = self.previous_token_total(&session_key).await;
        let input = request_input(
            &session_key,
            &session,
            spec_id,
            text,
            true,
            Some(code),
            Some(language),
        );
        let config = InvokeConfig::for_thread(&session_key);

        let invocation =
            tokio::time::timeout(self.submit_timeout, self.graph.invoke(input, &config));
        let final_state = match invocation.await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                error!(session_id = session.id, error = %e, "submission graph failed");
                return Ok(SubmitResponse {
                    session_id: session.id,
                    submission_id: None,
                    final_scores: None,
                    turn_scores: None,
                    feedback: None,
                    error: true,
                    error_message: Some(format!("submission processing failed: {e}")),
                    tokens: TokenReport::default(),
                });
            }
            Err(_) => {
                error!(session_id = session.id, "submission flow timed out");
                return Ok(SubmitResponse {
                    session_id: session.id,
                    submission_id: None,
                    final_scores: None,
                    turn_scores: None,
                    feedback: None,
                    error: true,
                    error_message: Some("submission timed out".to_string()),
                    tokens: TokenReport::default(),
                });
            }
        };

        let s = self
            .finish_invocation(&session, &session_key, &final_state, previous_total)
            .await?;

        // Submission + runs + score rows durably before responding.
        let submission = SubmissionRepository::create(
            self.db.pool(),
            exam_id,
            participant_id,
            Some(spec_id),
            Some(session.id),
            code,
            language,
            "completed",
        )
        .await?;
        self.persist_runs(&s, submission.id).await;

        if let Some(final_scores) = &s.final_scores {
            SubmissionRepository::save_score(
                self.db.pool(),
                submission.id,
                Some(final_scores.prompt_score),
                Some(final_scores.performance_score),
                Some(final_scores.correctness_score),
                Some(final_scores.total_score),
                Some(&final_scores.grade),
                Some(&json!({
                    "turn_scores": s.turn_scores,
                    "holistic_flow_score": s.holistic_flow_score,
                    "skip_reason": s.code_execution.as_ref().and_then(|e| e.skip_reason.clone()),
                })),
            )
            .await?;
        }

        info!(
            session_id = session.id,
            submission_id = submission.id,
            total = s.final_scores.as_ref().map(|f| f.total_score),
            "submission recorded"
        );

        Ok(SubmitResponse {
            session_id: session.id,
            submission_id: Some(submission.id),
            final_scores: s
                .final_scores
                .as_ref()
                .map(|f| serde_json::to_value(f).unwrap_or(Value::Null)),
            turn_scores: Some(json!(s.turn_scores)),
            feedback: s.holistic_flow_analysis.clone(),
            error: false,
            error_message: s.error_message.clone(),
            tokens: TokenReport::from_state(&s),
        })
    }

    /// Per-case submission runs, recovered from the judge result record.
    async fn persist_runs(&self, s: &SessionState, submission_id: i64) {
        let Some(task_id) = s
            .code_execution
            .as_ref()
            .and_then(|e| e.task_id.as_deref())
        else {
            return;
        };
        let Ok(Some(result)) = self.ctx.queue.get_result(task_id).await else {
            return;
        };
        for case in &result.cases {
            if let Err(e) = SubmissionRepository::add_run(
                self.db.pool(),
                submission_id,
                case.index as i64,
                if case.passed { "passed" } else { "failed" },
                case.time,
                (case.memory_kb * 1024) as i64,
            )
            .await
            {
                warn!(submission_id, error = %e, "submission run write failed");
            }
        }
    }

    /// Request cancellation of an in-flight stream.
    pub fn cancel_stream(&self, turn_id: &str) -> bool {
        match self.cancellations.get(turn_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Stream a reply token by token.
    ///
    /// The producer writes [`StreamEvent`]s into a bounded channel; the
    /// cancellation flag is consulted at every delta. A cancelled stream
    /// flushes its partial content to the debug log and persists no AI
    /// message.
    pub async fn stream_message(
        self: &Arc<Self>,
        exam_id: i64,
        participant_id: i64,
        spec_id: i64,
        text: &str,
        turn_id: &str,
    ) -> Result<mpsc::Receiver<StreamEvent>, ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("message is empty".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        let flag = Arc::new(AtomicBool::new(false));
        self.cancellations.insert(turn_id.to_string(), flag.clone());

        let service = self.clone();
        let text = text.to_string();
        let turn_id = turn_id.to_string();
        tokio::spawn(async move {
            let result = service
                .run_stream(exam_id, participant_id, spec_id, &text, &turn_id, &flag, &tx)
                .await;
            if let Err(e) = result {
                error!(turn_id = %turn_id, error = %e, "stream failed");
                let _ = tx
                    .send(StreamEvent::Error {
                        turn_id: turn_id.clone(),
                        error: e.to_string(),
                    })
                    .await;
            }
            service.cancellations.remove(&turn_id);
        });

        Ok(rx)
    }

    async fn run_stream(
        &self,
        exam_id: i64,
        participant_id: i64,
        spec_id: i64,
        text: &str,
        turn_id: &str,
        cancel: &AtomicBool,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), ServiceError> {
        let session = self.open_session(exam_id, participant_id, spec_id).await?;
        let session_key = Self::session_key(&session);

        // User message durably before any generation (write-order).
        SessionRepository::save_message(
            self.db.pool(),
            session.id,
            None,
            MessageRole::User,
            text,
            0,
            None,
        )
        .await?;

        // Working state: cached session state plus this request.
        let cached = self
            .ctx
            .state_repo
            .get_state(&session_key)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| {
                initial_state(&session_key, exam_id, participant_id, spec_id, text)
            });
        let mut s = SessionState::from_value(&cached)
            .map_err(|e| ServiceError::InvalidRequest(format!("state corrupted: {e}")))?;
        s.human_message = text.to_string();
        s.current_turn += 1;
        s.is_guardrail_failed = false;
        s.guardrail_message = None;
        s.request_type = None;
        if s.problem_context.is_none() {
            s.problem_context = Some(self.ctx.problems.resolve(spec_id).await);
        }

        // Layer-1 guardrail applies to the streaming path too.
        let keywords = s
            .problem_context
            .as_ref()
            .map(|p| p.guardrail_keywords())
            .unwrap_or_default();
        if let Some(block) =
            evaluator::guardrail::prefilter(text, &keywords, &s.recent_contents(3))
        {
            s.is_guardrail_failed = true;
            s.guardrail_message = Some(block.violation_message);
        }

        let prompt = writer_node::select_system_prompt(&self.ctx, &s)
            .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;
        let messages = writer_node::assemble_messages(&prompt.system_prompt, &s);

        let mut stream = self
            .ctx
            .chat_model
            .stream(ChatRequest::new(messages))
            .await
            .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;

        let mut full_content = String::new();
        let mut usage = TokenUsage::default();
        while let Some(chunk) = stream.next().await {
            if cancel.load(Ordering::SeqCst) {
                // Flush the partial content for debugging; nothing persists.
                info!(
                    turn_id = %turn_id,
                    partial_len = full_content.len(),
                    partial = %full_content,
                    "stream cancelled"
                );
                let _ = tx
                    .send(StreamEvent::Cancelled {
                        turn_id: turn_id.to_string(),
                    })
                    .await;
                return Ok(());
            }
            match chunk {
                Ok(chunk) => {
                    if let Some(chunk_usage) = chunk.usage {
                        usage += chunk_usage;
                    }
                    if !chunk.delta.is_empty() {
                        full_content.push_str(&chunk.delta);
                        let _ = tx
                            .send(StreamEvent::Delta {
                                content: chunk.delta,
                                turn_id: turn_id.to_string(),
                            })
                            .await;
                    }
                }
                Err(e) => {
                    let _ = tx
                        .send(StreamEvent::Error {
                            turn_id: turn_id.to_string(),
                            error: e.to_string(),
                        })
                        .await;
                    return Ok(());
                }
            }
        }

        // Completed: persist the AI message, then the advisory cache state.
        SessionRepository::save_message(
            self.db.pool(),
            session.id,
            Some(s.current_turn as i64),
            MessageRole::Ai,
            &full_content,
            usage.completion_tokens as i64,
            None,
        )
        .await?;
        if usage.total_tokens > 0 {
            SessionRepository::add_tokens(self.db.pool(), session.id, usage.total_tokens as i64)
                .await?;
        }

        let now = Utc::now();
        s.messages.push(ChatMessage {
            role: CoreRole::User,
            content: text.to_string(),
            turn: Some(s.current_turn),
            timestamp: Some(now),
        });
        s.messages.push(ChatMessage {
            role: CoreRole::Assistant,
            content: full_content.clone(),
            turn: Some(s.current_turn),
            timestamp: Some(now),
        });
        s.ai_message = Some(full_content.clone());
        s.chat_tokens += usage;
        if let Err(e) = self
            .ctx
            .state_repo
            .save_state(&session_key, &s.to_value())
            .await
        {
            warn!(session_id = session.id, error = %e, "stream state cache write failed");
        }
        if let Err(e) = self
            .ctx
            .state_repo
            .save_turn_mapping(
                &session_key,
                s.current_turn,
                s.messages.len() - 2,
                s.messages.len() - 1,
            )
            .await
        {
            warn!(session_id = session.id, error = %e, "stream turn mapping write failed");
        }

        let _ = tx
            .send(StreamEvent::Done {
                turn_id: turn_id.to_string(),
                full_content,
                chat_tokens: s.chat_tokens,
                eval_tokens: s.eval_tokens,
            })
            .await;
        Ok(())
    }

    /// Live session state from the cache.
    pub async fn get_session_state(&self, session_id: i64) -> Result<Value, ServiceError> {
        self.ctx
            .state_repo
            .get_state(&format!("session_{session_id}"))
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session {session_id} state")))
    }

    /// Final scores from the cache.
    pub async fn get_session_scores(&self, session_id: i64) -> Result<Value, ServiceError> {
        self.ctx
            .state_repo
            .get_final_scores(&format!("session_{session_id}"))
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session {session_id} scores")))
    }

    /// Conversation history: cache state first, durable messages as the
    /// fallback.
    pub async fn get_conversation_history(
        &self,
        session_id: i64,
    ) -> Result<Vec<Value>, ServiceError> {
        let session_key = format!("session_{session_id}");
        if let Some(state) = self.ctx.state_repo.get_state(&session_key).await? {
            if let Ok(s) = SessionState::from_value(&state) {
                if !s.messages.is_empty() {
                    return Ok(s
                        .messages
                        .iter()
                        .map(|m| json!({"role": m.role.as_str(), "content": m.content, "turn": m.turn}))
                        .collect());
                }
            }
        }
        let messages = SessionRepository::get_messages(self.db.pool(), session_id, None).await?;
        Ok(messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content, "turn": m.turn}))
            .collect())
    }

    /// Drop the cached session state and its checkpoints.
    pub async fn clear_session(&self, session_id: i64) -> Result<bool, ServiceError> {
        let session_key = format!("session_{session_id}");
        let existed = self.ctx.state_repo.clear_session(&session_key).await?;
        if let Err(e) = self.checkpointer.delete_thread(&session_key).await {
            warn!(session_id, error = %e, "checkpoint delete failed");
        }
        Ok(existed)
    }

    /// Durable-store pool, for API-level lookups.
    pub fn db_pool(&self) -> &storage::db::DatabasePool {
        self.db.pool()
    }

    /// Open (or reuse) a session without sending a message.
    pub async fn start_session(
        &self,
        exam_id: i64,
        participant_id: i64,
        spec_id: i64,
    ) -> Result<PromptSession, ServiceError> {
        self.open_session(exam_id, participant_id, spec_id).await
    }
}

/// Per-request graph input. Accumulated state comes from the thread's
/// checkpoint; the input carries only identity and this request's fields, so
/// the append/merge reducers never see duplicates.
fn request_input(
    session_key: &str,
    session: &PromptSession,
    spec_id: i64,
    text: &str,
    is_submission: bool,
    code: Option<&str>,
    language: Option<&str>,
) -> Value {
    let mut input = json!({
        "session_id": session_key,
        "exam_id": session.exam_id,
        "participant_id": session.participant_id,
        "spec_id": spec_id,
        "human_message": text,
        "is_submitted": is_submission,
    });
    if let Some(code) = code {
        input["code_content"] = json!(code);
    }
    if let Some(language) = language {
        input["code_language"] = json!(language);
    }
    input
}
