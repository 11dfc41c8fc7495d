//! Integration tests for the durable store: turn assignment, idempotent
//! saves, open-session uniqueness, and evaluation/submission persistence.

use serde_json::json;
use storage::{
    Database, EvaluationRepository, EvaluationType, MessageRole, SessionRepository,
    SubmissionRepository,
};

#[tokio::test]
async fn open_session_is_unique_per_pair() {
    let db = Database::in_memory().await.unwrap();
    let pool = db.pool();

    let first = SessionRepository::get_or_create(pool, 1, 100, Some(10))
        .await
        .unwrap();
    let second = SessionRepository::get_or_create(pool, 1, 100, Some(10))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);

    // Closing the session allows a fresh one.
    SessionRepository::end_session(pool, first.id).await.unwrap();
    let third = SessionRepository::get_or_create(pool, 1, 100, Some(10))
        .await
        .unwrap();
    assert_ne!(first.id, third.id);

    // A different participant gets its own session.
    let other = SessionRepository::get_or_create(pool, 1, 101, Some(10))
        .await
        .unwrap();
    assert_ne!(third.id, other.id);
}

#[tokio::test]
async fn auto_turn_assignment_is_contiguous() {
    let db = Database::in_memory().await.unwrap();
    let pool = db.pool();
    let session = SessionRepository::create(pool, 1, 100, None).await.unwrap();

    for expected in 1..=4 {
        let saved = SessionRepository::save_message(
            pool,
            session.id,
            None,
            MessageRole::User,
            &format!("message {expected}"),
            0,
            None,
        )
        .await
        .unwrap();
        assert_eq!(saved.turn, expected);
    }
}

#[tokio::test]
async fn concurrent_burst_assigns_exact_turn_range() {
    let db = Database::in_memory().await.unwrap();
    let pool = db.pool().clone();
    let session = SessionRepository::create(&pool, 1, 100, None).await.unwrap();

    // Seed max(turn) = 3.
    for _ in 0..3 {
        SessionRepository::save_message(&pool, session.id, None, MessageRole::User, "seed", 0, None)
            .await
            .unwrap();
    }

    // 10 concurrent saves with no explicit turn must land on exactly 4..=13.
    let mut handles = Vec::new();
    for i in 0..10 {
        let pool = pool.clone();
        let session_id = session.id;
        handles.push(tokio::spawn(async move {
            SessionRepository::save_message(
                &pool,
                session_id,
                None,
                MessageRole::User,
                &format!("burst {i}"),
                0,
                None,
            )
            .await
            .unwrap()
            .turn
        }));
    }

    let mut turns = Vec::new();
    for handle in handles {
        turns.push(handle.await.unwrap());
    }
    turns.sort_unstable();
    assert_eq!(turns, (4..=13).collect::<Vec<i64>>());
}

#[tokio::test]
async fn explicit_save_is_idempotent() {
    let db = Database::in_memory().await.unwrap();
    let pool = db.pool();
    let session = SessionRepository::create(pool, 1, 100, None).await.unwrap();

    let first = SessionRepository::save_message(
        pool,
        session.id,
        Some(1),
        MessageRole::User,
        "hello",
        5,
        None,
    )
    .await
    .unwrap();
    assert!(!first.already_existed);

    let replay = SessionRepository::save_message(
        pool,
        session.id,
        Some(1),
        MessageRole::User,
        "hello again",
        5,
        None,
    )
    .await
    .unwrap();
    assert!(replay.already_existed);
    assert_eq!(replay.id, first.id);

    // Same turn, different role is a distinct row (one turn pair).
    let ai = SessionRepository::save_message(
        pool,
        session.id,
        Some(1),
        MessageRole::Ai,
        "hi there",
        7,
        None,
    )
    .await
    .unwrap();
    assert!(!ai.already_existed);

    let messages = SessionRepository::get_messages(pool, session.id, None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "USER");
    assert_eq!(messages[1].role, "AI");
}

#[tokio::test]
async fn turn_ordering_is_monotonic_in_insertion_order() {
    let db = Database::in_memory().await.unwrap();
    let pool = db.pool();
    let session = SessionRepository::create(pool, 1, 100, None).await.unwrap();

    for turn in 1..=3i64 {
        SessionRepository::save_message(
            pool,
            session.id,
            Some(turn),
            MessageRole::User,
            "q",
            0,
            None,
        )
        .await
        .unwrap();
        SessionRepository::save_message(pool, session.id, Some(turn), MessageRole::Ai, "a", 0, None)
            .await
            .unwrap();
    }

    let messages = SessionRepository::get_messages(pool, session.id, None)
        .await
        .unwrap();
    let turns: Vec<i64> = messages.iter().map(|m| m.turn).collect();
    let mut sorted = turns.clone();
    sorted.sort_unstable();
    assert_eq!(turns, sorted);
    assert_eq!(SessionRepository::max_turn(pool, session.id).await.unwrap(), 3);
}

#[tokio::test]
async fn token_accumulation_never_decreases() {
    let db = Database::in_memory().await.unwrap();
    let pool = db.pool();
    let session = SessionRepository::create(pool, 1, 100, None).await.unwrap();

    SessionRepository::add_tokens(pool, session.id, 120).await.unwrap();
    SessionRepository::add_tokens(pool, session.id, 80).await.unwrap();

    let reloaded = SessionRepository::get_by_id(pool, session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.total_tokens, 200);
}

#[tokio::test]
async fn evaluation_upsert_replaces_per_key() {
    let db = Database::in_memory().await.unwrap();
    let pool = db.pool();
    let session = SessionRepository::create(pool, 1, 100, None).await.unwrap();

    EvaluationRepository::upsert(
        pool,
        session.id,
        Some(1),
        EvaluationType::TurnEval,
        Some("turn_evaluator"),
        Some(70.0),
        Some("first pass"),
        None,
    )
    .await
    .unwrap();
    EvaluationRepository::upsert(
        pool,
        session.id,
        Some(1),
        EvaluationType::TurnEval,
        Some("turn_evaluator"),
        Some(85.0),
        Some("re-evaluated"),
        Some(&json!({"rubrics": []})),
    )
    .await
    .unwrap();

    // Holistic rows use a NULL turn and coexist with per-turn rows.
    EvaluationRepository::upsert(
        pool,
        session.id,
        None,
        EvaluationType::HolisticFlow,
        Some("eval_holistic_flow"),
        Some(64.0),
        None,
        None,
    )
    .await
    .unwrap();

    let turn_row = EvaluationRepository::get(pool, session.id, Some(1), EvaluationType::TurnEval)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(turn_row.score, Some(85.0));

    let all = EvaluationRepository::list_for_session(pool, session.id)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn submission_runs_and_score_roundtrip() {
    let db = Database::in_memory().await.unwrap();
    let pool = db.pool();
    let session = SessionRepository::create(pool, 1, 100, Some(10)).await.unwrap();

    let submission = SubmissionRepository::create(
        pool,
        1,
        100,
        Some(10),
        Some(session.id),
        "print(42)",
        "python",
        "pending",
    )
    .await
    .unwrap();

    SubmissionRepository::add_run(pool, submission.id, 0, "passed", 0.12, 18_432)
        .await
        .unwrap();
    SubmissionRepository::add_run(pool, submission.id, 1, "failed", 0.20, 20_000)
        .await
        .unwrap();
    SubmissionRepository::save_score(
        pool,
        submission.id,
        Some(72.0),
        Some(60.0),
        Some(50.0),
        Some(58.0),
        Some("F"),
        Some(&json!({"skip_reason": null})),
    )
    .await
    .unwrap();
    SubmissionRepository::set_status(pool, submission.id, "completed")
        .await
        .unwrap();

    let runs = SubmissionRepository::get_runs(pool, submission.id).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].verdict, "passed");

    let score = SubmissionRepository::get_score(pool, submission.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(score.total_score, Some(58.0));

    let stored = SubmissionRepository::get(pool, submission.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "completed");
}
