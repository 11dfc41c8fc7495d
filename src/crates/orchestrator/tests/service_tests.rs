//! Service-level integration tests: write-order, turn continuity across
//! requests, submission persistence, and streaming cancellation.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use evaluator::{EvaluatorContext, ProblemRegistry, PromptRegistry};
use judge::{JudgeWorker, MemoryQueue, MockSandbox};
use llm::testing::{MockChatModel, MockReply};
use llm::ChatModel;
use orchestrator::{EvalService, StreamEvent};
use storage::{Database, MemoryCache, SessionRepository, StateRepository, SubmissionRepository};

async fn service_with(
    chat_model: Arc<dyn ChatModel>,
    eval_model: Arc<dyn ChatModel>,
    queue: Arc<MemoryQueue>,
) -> (Arc<EvalService>, Database) {
    let db = Database::in_memory().await.unwrap();
    let ctx = Arc::new(EvaluatorContext {
        chat_model,
        eval_model,
        prompts: Arc::new(PromptRegistry::embedded()),
        problems: Arc::new(ProblemRegistry::new()),
        state_repo: StateRepository::new(Arc::new(MemoryCache::new())),
        db: Some(db.clone()),
        queue,
        queue_poll_interval: Duration::from_millis(10),
        queue_poll_cap: Duration::from_millis(500),
    });
    let service = Arc::new(EvalService::new(ctx, db.clone()).unwrap());
    (service, db)
}

fn safe_chat_json() -> String {
    json!({
        "status": "SAFE",
        "request_type": "CHAT",
        "guide_strategy": "LOGIC_HINT",
        "keywords": [],
        "is_submission_request": false,
        "guardrail_passed": true,
        "reasoning": "fine"
    })
    .to_string()
}

fn eval_union_model() -> Arc<MockChatModel> {
    Arc::new(MockChatModel::answering_json(json!({
        "intent_types": ["HINT_OR_QUERY"],
        "confidence": 0.8,
        "rubrics": [
            {"name": "Clarity", "score": 70.0, "reasoning": "ok"},
            {"name": "Problem Relevance", "score": 70.0, "reasoning": "ok"},
            {"name": "Context Use", "score": 70.0, "reasoning": "ok"},
            {"name": "Specificity", "score": 70.0, "reasoning": "ok"},
        ],
        "final_reasoning": "ok",
        "overall_flow_score": 64.0,
        "analysis": "ok",
        "correctness": 80.0,
        "efficiency": 70.0,
        "best_practices": 60.0,
    })))
}

#[tokio::test]
async fn chat_message_persists_pair_before_returning() {
    let chat = Arc::new(MockChatModel::with_replies(vec![
        safe_chat_json(),
        "Try thinking about subsets.".to_string(),
    ]));
    let (service, db) = service_with(chat, eval_union_model(), Arc::new(MemoryQueue::new())).await;

    let response = service
        .process_message(1, 100, 10, "힌트 주세요")
        .await
        .unwrap();

    assert!(!response.error);
    assert_eq!(response.turn, 1);
    assert_eq!(response.ai_message.as_deref(), Some("Try thinking about subsets."));
    assert!(response.tokens.total_tokens > 0);

    // Write-order: both rows are durable by the time the response exists.
    let messages = SessionRepository::get_messages(db.pool(), response.session_id, None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "USER");
    assert_eq!(messages[0].turn, 1);
    assert_eq!(messages[1].role, "AI");
    assert_eq!(messages[1].turn, 1);

    // Session token counter moved.
    let session = SessionRepository::get_by_id(db.pool(), response.session_id)
        .await
        .unwrap()
        .unwrap();
    assert!(session.total_tokens > 0);
}

#[tokio::test]
async fn consecutive_messages_continue_turn_sequence() {
    let chat = Arc::new(MockChatModel::with_replies(vec![
        safe_chat_json(),
        "first reply".to_string(),
        safe_chat_json(),
        "second reply".to_string(),
    ]));
    let (service, db) = service_with(chat, eval_union_model(), Arc::new(MemoryQueue::new())).await;

    let first = service.process_message(1, 100, 10, "질문 하나").await.unwrap();
    let second = service.process_message(1, 100, 10, "질문 둘").await.unwrap();

    assert_eq!(first.session_id, second.session_id);
    assert_eq!(first.turn, 1);
    assert_eq!(second.turn, 2);

    let messages = SessionRepository::get_messages(db.pool(), first.session_id, None)
        .await
        .unwrap();
    let turns: Vec<i64> = messages.iter().map(|m| m.turn).collect();
    assert_eq!(turns, vec![1, 1, 2, 2]);
}

#[tokio::test]
async fn submit_persists_submission_runs_and_score() {
    let chat = Arc::new(MockChatModel::answering_json(json!({
        "status": "SAFE",
        "request_type": "SUBMISSION",
        "is_submission_request": true,
        "guardrail_passed": true,
        "reasoning": "submission"
    })));
    let queue = Arc::new(MemoryQueue::new());
    let (worker, shutdown) = JudgeWorker::spawn(queue.clone(), Arc::new(MockSandbox::passing()));
    let (service, db) = service_with(chat, eval_union_model(), queue).await;

    let response = service
        .submit_code(1, 100, 10, "print(35)", "python")
        .await
        .unwrap();

    assert!(!response.error);
    let submission_id = response.submission_id.unwrap();
    let final_scores = response.final_scores.unwrap();
    assert!(final_scores["total_score"].as_f64().unwrap() > 0.0);

    // Property 8: submission row, score row, and the user message all exist.
    let submission = SubmissionRepository::get(db.pool(), submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(submission.status, "completed");
    let score = SubmissionRepository::get_score(db.pool(), submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(score.total_score, final_scores["total_score"].as_f64());
    let runs = SubmissionRepository::get_runs(db.pool(), submission_id)
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);
    let messages = SessionRepository::get_messages(db.pool(), response.session_id, None)
        .await
        .unwrap();
    assert!(messages.iter().any(|m| m.role == "USER"));

    shutdown.send(true).unwrap();
    worker.await.unwrap();
}

#[tokio::test]
async fn graph_failure_returns_business_error_envelope() {
    // Non-retryable classifier failure: the graph aborts and the service
    // wraps it into an error response instead of an HTTP failure.
    let chat = Arc::new(MockChatModel::with_script(vec![MockReply::Error(
        llm::LlmError::InvalidRequest("schema rejected".into()),
    )]));
    let (service, db) = service_with(chat, eval_union_model(), Arc::new(MemoryQueue::new())).await;

    let response = service.process_message(1, 100, 10, "힌트 주세요").await.unwrap();
    assert!(response.error);
    assert!(response.error_message.unwrap().contains("processing failed"));
    assert_eq!(response.error_details.unwrap()["error_type"], "graph_execution");

    // The user message was still written first (write-order).
    let messages = SessionRepository::get_messages(db.pool(), response.session_id, None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "USER");
}

#[tokio::test]
async fn empty_message_is_a_validation_error() {
    let (service, _db) = service_with(
        Arc::new(MockChatModel::new()),
        eval_union_model(),
        Arc::new(MemoryQueue::new()),
    )
    .await;
    assert!(service.process_message(1, 100, 10, "   ").await.is_err());
    assert!(service.submit_code(1, 100, 10, "", "python").await.is_err());
}

#[tokio::test]
async fn stream_cancellation_stops_deltas_and_skips_ai_persistence() {
    // E6: cancel after the first delta; the stream emits `cancelled`, no
    // further deltas for the turn, and no AI message row is written.
    let long_reply = (0..200)
        .map(|i| format!("word{i}"))
        .collect::<Vec<_>>()
        .join(" ");
    let chat = Arc::new(MockChatModel::with_replies(vec![long_reply]));
    let (service, db) = service_with(chat, eval_union_model(), Arc::new(MemoryQueue::new())).await;

    let mut rx = service
        .stream_message(1, 100, 10, "힌트 주세요", "turn-1")
        .await
        .unwrap();

    // First delta, then cancel.
    let first = rx.recv().await.unwrap();
    assert!(matches!(first, StreamEvent::Delta { .. }));
    assert!(service.cancel_stream("turn-1"));

    let mut saw_cancelled = false;
    let mut saw_done = false;
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Cancelled { turn_id } => {
                assert_eq!(turn_id, "turn-1");
                saw_cancelled = true;
            }
            StreamEvent::Done { .. } => saw_done = true,
            _ => {}
        }
    }
    assert!(saw_cancelled);
    assert!(!saw_done);

    // The user message persisted; no AI message did.
    let session = SessionRepository::get_active(db.pool(), 1, 100)
        .await
        .unwrap()
        .unwrap();
    let messages = SessionRepository::get_messages(db.pool(), session.id, None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "USER");
}

#[tokio::test]
async fn uncancelled_stream_completes_and_persists() {
    let chat = Arc::new(MockChatModel::with_replies(vec![
        "short streamed reply".to_string(),
    ]));
    let (service, db) = service_with(chat, eval_union_model(), Arc::new(MemoryQueue::new())).await;

    let mut rx = service
        .stream_message(1, 100, 10, "힌트 주세요", "turn-2")
        .await
        .unwrap();

    let mut full = String::new();
    let mut done_content = None;
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Delta { content, .. } => full.push_str(&content),
            StreamEvent::Done { full_content, .. } => done_content = Some(full_content),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(full, "short streamed reply");
    assert_eq!(done_content.as_deref(), Some("short streamed reply"));

    let session = SessionRepository::get_active(db.pool(), 1, 100)
        .await
        .unwrap()
        .unwrap();
    let messages = SessionRepository::get_messages(db.pool(), session.id, None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, "AI");
    assert_eq!(messages[1].content, "short streamed reply");
}

#[tokio::test]
async fn read_through_helpers_and_clear() {
    let chat = Arc::new(MockChatModel::with_replies(vec![
        safe_chat_json(),
        "a reply".to_string(),
    ]));
    let (service, _db) = service_with(chat, eval_union_model(), Arc::new(MemoryQueue::new())).await;

    let response = service.process_message(1, 100, 10, "질문").await.unwrap();
    let session_id = response.session_id;

    let state = service.get_session_state(session_id).await.unwrap();
    assert_eq!(state["current_turn"], 1);

    let history = service.get_conversation_history(session_id).await.unwrap();
    assert_eq!(history.len(), 2);

    // No submission yet: scores read misses.
    assert!(service.get_session_scores(session_id).await.is_err());

    assert!(service.clear_session(session_id).await.unwrap());
    assert!(service.get_session_state(session_id).await.is_err());
}
