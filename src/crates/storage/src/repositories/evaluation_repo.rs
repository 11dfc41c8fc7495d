//! Evaluation record repository.
//!
//! Rows are keyed `(session, turn, evaluation_type)` with `turn = NULL` for
//! holistic records. Saves are upserts: re-evaluating a turn replaces its
//! record. Evaluation persistence is non-fatal to the flow that triggers it;
//! callers log and continue on error.

use chrono::Utc;

use crate::db::DatabasePool;
use crate::error::Result;
use crate::models::{EvaluationType, PromptEvaluation};

/// Repository for `prompt_evaluations`.
pub struct EvaluationRepository;

impl EvaluationRepository {
    /// Insert or replace an evaluation record.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert(
        pool: &DatabasePool,
        session_id: i64,
        turn: Option<i64>,
        evaluation_type: EvaluationType,
        node_name: Option<&str>,
        score: Option<f64>,
        analysis: Option<&str>,
        details: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let details_text = details.map(|d| d.to_string());

        sqlx::query(
            "DELETE FROM prompt_evaluations
             WHERE session_id = ? AND COALESCE(turn, -1) = COALESCE(?, -1)
               AND evaluation_type = ?",
        )
        .bind(session_id)
        .bind(turn)
        .bind(evaluation_type.as_str())
        .execute(pool)
        .await?;

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO prompt_evaluations
                 (session_id, turn, evaluation_type, node_name, score, analysis, details, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(session_id)
        .bind(turn)
        .bind(evaluation_type.as_str())
        .bind(node_name)
        .bind(score)
        .bind(analysis)
        .bind(&details_text)
        .bind(&now)
        .fetch_one(pool)
        .await?;

        Ok(row.0)
    }

    /// Fetch one record.
    pub async fn get(
        pool: &DatabasePool,
        session_id: i64,
        turn: Option<i64>,
        evaluation_type: EvaluationType,
    ) -> Result<Option<PromptEvaluation>> {
        let row = sqlx::query_as::<_, PromptEvaluation>(
            "SELECT * FROM prompt_evaluations
             WHERE session_id = ? AND COALESCE(turn, -1) = COALESCE(?, -1)
               AND evaluation_type = ?",
        )
        .bind(session_id)
        .bind(turn)
        .bind(evaluation_type.as_str())
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// All records of a session ordered by turn.
    pub async fn list_for_session(
        pool: &DatabasePool,
        session_id: i64,
    ) -> Result<Vec<PromptEvaluation>> {
        let rows = sqlx::query_as::<_, PromptEvaluation>(
            "SELECT * FROM prompt_evaluations WHERE session_id = ?
             ORDER BY COALESCE(turn, 1000000) ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}
