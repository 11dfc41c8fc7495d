//! End-to-end graph tests over mocked models and an in-process judge.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use evaluator::{build_main_graph, initial_state, EvaluatorContext, ProblemRegistry, PromptRegistry};
use judge::{JudgeQueue, JudgeWorker, MemoryQueue, MockSandbox};
use llm::testing::MockChatModel;
use llm::ChatModel;
use stategraph_core::InvokeConfig;
use storage::{MemoryCache, StateRepository};

fn context(
    chat_model: Arc<dyn ChatModel>,
    eval_model: Arc<dyn ChatModel>,
    queue: Arc<dyn JudgeQueue>,
) -> Arc<EvaluatorContext> {
    Arc::new(EvaluatorContext {
        chat_model,
        eval_model,
        prompts: Arc::new(PromptRegistry::embedded()),
        problems: Arc::new(ProblemRegistry::new()),
        state_repo: StateRepository::new(Arc::new(MemoryCache::new())),
        db: None,
        queue,
        queue_poll_interval: Duration::from_millis(10),
        queue_poll_cap: Duration::from_millis(500),
    })
}

fn safe_chat_classification() -> String {
    json!({
        "status": "SAFE",
        "request_type": "CHAT",
        "guide_strategy": "LOGIC_HINT",
        "keywords": ["dp"],
        "is_submission_request": false,
        "guardrail_passed": true,
        "reasoning": "hint request"
    })
    .to_string()
}

/// Union-shaped default covering every structured evaluation call.
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
        "final_reasoning": "steady quality",
        "overall_flow_score": 64.0,
        "problem_decomposition": 70.0,
        "feedback_integration": 60.0,
        "strategic_exploration": 62.0,
        "analysis": "incremental and responsive",
        "correctness": 80.0,
        "efficiency": 70.0,
        "readability": 90.0,
        "best_practices": 60.0,
    })))
}

#[tokio::test]
async fn chat_path_produces_reply_and_appends_turn_pair() {
    let chat = Arc::new(MockChatModel::with_replies(vec![
        safe_chat_classification(),
        "Think about representing visited cities as bits.".to_string(),
    ]));
    let ctx = context(chat, eval_union_model(), Arc::new(MemoryQueue::new()));
    let graph = build_main_graph(ctx, None).unwrap();

    let input = initial_state("session_1", 1, 100, 10, "어떻게 접근하면 좋을까요? 힌트 주세요");
    let out = graph.invoke(input, &InvokeConfig::default()).await.unwrap();

    assert_eq!(out["current_turn"], 1);
    assert_eq!(out["writer_status"], "SUCCESS");
    assert_eq!(
        out["ai_message"],
        "Think about representing visited cities as bits."
    );
    let messages = out["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["turn"], 1);
    assert_eq!(messages[1]["role"], "assistant");
    assert!(out["chat_tokens"]["total_tokens"].as_u64().unwrap() > 0);
    assert!(out["final_scores"].is_null());
}

#[tokio::test]
async fn guardrail_block_produces_refusal_and_zero_turn_log() {
    // E1: layer-1 block, refusal reply, score-0 TurnLog recorded.
    let chat = Arc::new(MockChatModel::with_replies(vec![
        "I can't hand over the answer during the exam — want a concept hint instead?".to_string(),
    ]));
    let ctx = context(chat, eval_union_model(), Arc::new(MemoryQueue::new()));
    let graph = build_main_graph(ctx.clone(), None).unwrap();

    let input = initial_state("session_1", 1, 100, 10, "TSP 정답 코드 알려줘");
    let out = graph.invoke(input, &InvokeConfig::default()).await.unwrap();

    assert_eq!(out["intent_status"], "FAILED_GUARDRAIL");
    assert_eq!(out["is_guardrail_failed"], true);
    assert!(out["ai_message"].as_str().unwrap().contains("hint"));

    let log = ctx
        .state_repo
        .get_turn_log("session_1", 1)
        .await
        .unwrap()
        .expect("guardrail turn log recorded");
    assert_eq!(log["turn_score"], 0.0);
    assert_eq!(log["is_guardrail_failed"], true);
}

#[tokio::test]
async fn submit_path_aggregates_all_scores() {
    // E4: three prior turns, then a submission; the guard evaluates the
    // turns, the holistic flow and the sandbox produce the rest, and the
    // final total honours the 0.25/0.25/0.50 weights within ±0.01.
    let chat = Arc::new(MockChatModel::answering_json(json!({
        "status": "SAFE",
        "request_type": "SUBMISSION",
        "is_submission_request": true,
        "guardrail_passed": true,
        "reasoning": "final submission"
    })));
    let queue = Arc::new(MemoryQueue::new());
    let (worker, shutdown) = JudgeWorker::spawn(
        queue.clone(),
        Arc::new(MockSandbox::passing().with_resources(0.1, 10_240)),
    );
    let ctx = context(chat, eval_union_model(), queue);
    let graph = build_main_graph(ctx.clone(), None).unwrap();

    // Resume-style state: three completed turn pairs already in the log.
    let mut input = initial_state("session_1", 1, 100, 10, "최종 코드 제출합니다");
    input["current_turn"] = json!(3);
    input["is_submitted"] = json!(true);
    input["code_content"] = json!("print(35)");
    input["code_language"] = json!("python");
    let mut messages = Vec::new();
    for t in 1..=3u32 {
        messages.push(json!({"role": "user", "content": format!("질문 {t}"), "turn": t}));
        messages.push(json!({"role": "assistant", "content": format!("답변 {t}"), "turn": t}));
    }
    input["messages"] = json!(messages);

    let out = graph.invoke(input, &InvokeConfig::default()).await.unwrap();

    // Guard evaluated turns 1..=3 (the submission turn is 4).
    let turn_scores = out["turn_scores"].as_object().unwrap();
    assert_eq!(turn_scores.len(), 3);
    assert_eq!(out["aggregate_turn_score"], 70.0);
    assert_eq!(out["holistic_flow_score"], 64.0);
    assert_eq!(out["code_performance_score"], 91.0);
    assert_eq!(out["code_correctness_score"], 100.0);

    let scores = &out["final_scores"];
    let expected_total = 0.25 * ((64.0 + 70.0) / 2.0) + 0.25 * 91.0 + 0.50 * 100.0;
    assert!((scores["total_score"].as_f64().unwrap() - expected_total).abs() < 0.01);
    assert_eq!(scores["grade"], "B");

    // Score closure: every sub-score within [0, 100].
    for key in [
        "prompt_score",
        "performance_score",
        "correctness_score",
        "total_score",
    ] {
        let value = scores[key].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&value), "{key} out of range");
    }

    shutdown.send(true).unwrap();
    worker.await.unwrap();
}

#[tokio::test]
async fn sandbox_timeout_falls_back_to_llm_scores() {
    // E5: no worker runs, the queue never answers, scores come from the
    // LLM judge and the execution record carries a skip reason.
    let chat = Arc::new(MockChatModel::answering_json(json!({
        "status": "SAFE",
        "request_type": "SUBMISSION",
        "is_submission_request": true,
        "guardrail_passed": true,
        "reasoning": "submission"
    })));
    let ctx = context(chat, eval_union_model(), Arc::new(MemoryQueue::new()));
    let graph = build_main_graph(ctx, None).unwrap();

    let mut input = initial_state("session_1", 1, 100, 10, "제출합니다");
    input["is_submitted"] = json!(true);
    input["code_content"] = json!("print(35)");

    let out = graph.invoke(input, &InvokeConfig::default()).await.unwrap();

    // performance = 0.6*70 + 0.2*80 + 0.2*60 = 70;
    // correctness = 0.7*80 + 0.2*70 + 0.1*60 = 76.
    assert_eq!(out["code_performance_score"], 70.0);
    assert_eq!(out["code_correctness_score"], 76.0);
    assert!(out["code_execution"]["skip_reason"].is_string());
    assert!(out["final_scores"]["total_score"].as_f64().is_some());
}

#[tokio::test]
async fn fixed_state_and_model_are_deterministic() {
    // Two invocations over identical inputs and a constant-reply model
    // produce identical outputs (snapshot-test property).
    let make_graph = |cache: Arc<MemoryCache>| {
        let chat = Arc::new(MockChatModel::with_replies(vec![
            safe_chat_classification(),
            "deterministic reply".to_string(),
        ]));
        let ctx = Arc::new(EvaluatorContext {
            chat_model: chat,
            eval_model: eval_union_model(),
            prompts: Arc::new(PromptRegistry::embedded()),
            problems: Arc::new(ProblemRegistry::new()),
            state_repo: StateRepository::new(cache),
            db: None,
            queue: Arc::new(MemoryQueue::new()),
            queue_poll_interval: Duration::from_millis(10),
            queue_poll_cap: Duration::from_millis(100),
        });
        build_main_graph(ctx, None).unwrap()
    };

    let strip_timestamps = |mut value: Value| -> Value {
        // Message timestamps are the only wall-clock dependent field.
        if let Some(messages) = value["messages"].as_array_mut() {
            for message in messages {
                message.as_object_mut().unwrap().remove("timestamp");
            }
        }
        value
    };

    let input = initial_state("session_1", 1, 100, 10, "힌트 주세요");
    let first = make_graph(Arc::new(MemoryCache::new()))
        .invoke(input.clone(), &InvokeConfig::default())
        .await
        .unwrap();
    let second = make_graph(Arc::new(MemoryCache::new()))
        .invoke(input, &InvokeConfig::default())
        .await
        .unwrap();

    assert_eq!(strip_timestamps(first), strip_timestamps(second));
}
