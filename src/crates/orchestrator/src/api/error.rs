//! API error types and the business-error envelope.
//!
//! Non-2xx statuses are reserved for programming errors (malformed input,
//! unknown routes). Business failures — guardrail refusals, graph errors,
//! sandbox fallbacks — return 200 with `{error: true, error_code,
//! error_message, details?}` so clients handle one envelope shape.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::service::ServiceError;

/// Canonical business-error envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub error: bool,
    pub error_code: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorEnvelope {
    /// Build an envelope (with `error` always true).
    pub fn new(error_code: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error: true,
            error_code: error_code.into(),
            error_message: error_message.into(),
            details: None,
        }
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Programming-error responses (4xx/5xx).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            ServiceError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let body = ErrorEnvelope::new(code, self.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_error_true() {
        let envelope = ErrorEnvelope::new("graph_execution", "node failed")
            .with_details(serde_json::json!({"session_id": 1}));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["error"], true);
        assert_eq!(value["error_code"], "graph_execution");
        assert_eq!(value["details"]["session_id"], 1);
    }

    #[test]
    fn service_errors_map_to_statuses() {
        let bad: ApiError = ServiceError::InvalidRequest("empty".into()).into();
        assert!(matches!(bad, ApiError::BadRequest(_)));
        let missing: ApiError = ServiceError::NotFound("session".into()).into();
        assert!(matches!(missing, ApiError::NotFound(_)));
    }
}
