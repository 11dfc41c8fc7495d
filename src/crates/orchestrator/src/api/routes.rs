//! REST routes.

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::error::ApiError;
use crate::api::ws::ws_handler;
use crate::service::{EvalService, MessageResponse, SubmitResponse};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The orchestration service.
    pub service: Arc<EvalService>,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat/message", post(post_message))
        .route("/chat/submit", post(post_submit))
        .route("/chat/ws", get(ws_handler))
        .route("/session/start", post(post_session_start))
        .route("/session/:id/messages", post(post_session_message))
        .route("/session/:id/submit", post(post_session_submit))
        .route("/session/:id/state", get(get_session_state))
        .route("/session/:id/scores", get(get_session_scores))
        .route("/session/:id/history", get(get_session_history))
        .route("/session/:id", delete(delete_session))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    exam_id: i64,
    participant_id: i64,
    spec_id: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    exam_id: i64,
    participant_id: i64,
    spec_id: i64,
    code: String,
    #[serde(default = "default_language")]
    language: String,
}

fn default_language() -> String {
    "python".to_string()
}

#[derive(Debug, Deserialize)]
struct SessionStartRequest {
    exam_id: i64,
    participant_id: i64,
    spec_id: i64,
}

#[derive(Debug, Deserialize)]
struct SessionMessageRequest {
    message: String,
}

#[derive(Debug, Deserialize)]
struct SessionSubmitRequest {
    code: String,
    #[serde(default = "default_language")]
    language: String,
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn post_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let response = state
        .service
        .process_message(
            request.exam_id,
            request.participant_id,
            request.spec_id,
            &request.message,
        )
        .await?;
    Ok(Json(response))
}

async fn post_submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let response = state
        .service
        .submit_code(
            request.exam_id,
            request.participant_id,
            request.spec_id,
            &request.code,
            &request.language,
        )
        .await?;
    Ok(Json(response))
}

async fn post_session_start(
    State(state): State<AppState>,
    Json(request): Json<SessionStartRequest>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .service
        .start_session(request.exam_id, request.participant_id, request.spec_id)
        .await?;
    Ok(Json(json!({
        "session_id": session.id,
        "exam_id": session.exam_id,
        "participant_id": session.participant_id,
        "spec_id": session.spec_id,
        "started_at": session.started_at,
    })))
}

/// Session-scoped message endpoint: the session row carries the identity.
async fn post_session_message(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
    Json(request): Json<SessionMessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let session = session_identity(&state, session_id).await?;
    let response = state
        .service
        .process_message(
            session.0,
            session.1,
            session.2,
            &request.message,
        )
        .await?;
    Ok(Json(response))
}

async fn post_session_submit(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
    Json(request): Json<SessionSubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let session = session_identity(&state, session_id).await?;
    let response = state
        .service
        .submit_code(session.0, session.1, session.2, &request.code, &request.language)
        .await?;
    Ok(Json(response))
}

async fn session_identity(
    state: &AppState,
    session_id: i64,
) -> Result<(i64, i64, i64), ApiError> {
    let session = storage::SessionRepository::get_by_id(state.service.db_pool(), session_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("session {session_id}")))?;
    Ok((
        session.exam_id,
        session.participant_id,
        session.spec_id.unwrap_or(0),
    ))
}

async fn get_session_state(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.service.get_session_state(session_id).await?))
}

async fn get_session_scores(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.service.get_session_scores(session_id).await?))
}

async fn get_session_history(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let history = state.service.get_conversation_history(session_id).await?;
    Ok(Json(json!({"session_id": session_id, "messages": history})))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let existed = state.service.clear_session(session_id).await?;
    Ok(Json(json!({"session_id": session_id, "cleared": existed})))
}
