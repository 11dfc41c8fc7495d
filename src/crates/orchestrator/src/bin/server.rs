//! Evaluator server binary.
//!
//! Wires the full stack: SQLite store, in-memory cache, middleware-wrapped
//! Gemini models, the judge queue with a co-resident worker, the evaluation
//! graph, and the axum API.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use evaluator::{EvaluatorContext, ProblemRegistry, PromptRegistry};
use judge::{Judge0Sandbox, JudgeWorker, MemoryQueue};
use llm::{wrap_chat_model, GeminiClient, MiddlewareConfig, RemoteLlmConfig};
use orchestrator::api::{router, AppState};
use orchestrator::{EvalService, ServerConfig};
use storage::{Database, MemoryCache, StateRepository};

#[derive(Debug, Parser)]
#[command(name = "evaluator-server", about = "AI coding-exam evaluation server")]
struct Args {
    /// Listen port (overrides PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Database URL (overrides DATABASE_URL).
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }

    let api_key = config
        .gemini_api_key
        .clone()
        .context("GEMINI_API_KEY is not set")?;

    // Durable store.
    let db = Database::connect(&config.database_url)
        .await
        .context("database connection failed")?;
    db.migrate().await.context("migration failed")?;
    info!(database_url = %config.database_url, "database ready");

    // Cache and queue; the worker runs co-resident with the memory queue.
    let cache = Arc::new(MemoryCache::new());
    let queue = Arc::new(MemoryQueue::new());
    let sandbox = Arc::new(
        Judge0Sandbox::new(&config.judge0_api_url, config.judge0_api_key.clone())
            .context("sandbox client construction failed")?,
    );
    let (worker_handle, worker_shutdown) = JudgeWorker::spawn(queue.clone(), sandbox);

    // Middleware-wrapped models: one pipeline per call-site tag.
    let llm_config = RemoteLlmConfig::new(api_key, &config.gemini_base_url, &config.gemini_model);
    let base_model = Arc::new(GeminiClient::new(llm_config).context("LLM client failed")?);
    let middleware = MiddlewareConfig {
        rate_limit_max_calls: config.rate_limit_max_calls,
        rate_limit_period: config.rate_limit_period,
        ..MiddlewareConfig::default()
    };
    let chat_model = wrap_chat_model(base_model.clone(), "chat", &middleware);
    let eval_model = wrap_chat_model(base_model, "eval", &middleware);

    let ctx = Arc::new(EvaluatorContext {
        chat_model,
        eval_model,
        prompts: Arc::new(PromptRegistry::embedded()),
        problems: Arc::new(ProblemRegistry::new()),
        state_repo: StateRepository::new(cache),
        db: Some(db.clone()),
        queue,
        queue_poll_interval: Duration::from_millis(500),
        queue_poll_cap: Duration::from_secs(60),
    });

    let service = Arc::new(
        EvalService::new(ctx, db)?
            .with_timeouts(config.chat_timeout, config.submit_timeout),
    );
    let app = router(AppState { service });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind failed on {addr}"))?;
    info!(addr = %addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    let _ = worker_shutdown.send(true);
    let _ = worker_handle.await;
    Ok(())
}
