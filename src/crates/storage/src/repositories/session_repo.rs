//! Session and message repository.
//!
//! Turn assignment is the delicate part: when the caller passes no turn, a
//! single `INSERT … SELECT COALESCE(MAX(turn),0)+1` statement computes and
//! inserts the next turn atomically, so concurrent writers on one session
//! get consecutive turns with no duplicates. Saves with an explicit
//! `(session, turn, role)` are idempotent: an existing row short-circuits to
//! its id.

use chrono::Utc;

use crate::db::DatabasePool;
use crate::error::{Result, StorageError};
use crate::models::{MessageRole, PromptMessage, PromptSession};

/// Outcome of a message save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedMessage {
    /// Row id (existing id for an idempotent hit).
    pub id: i64,
    /// Turn the message landed on.
    pub turn: i64,
    /// True when the row already existed.
    pub already_existed: bool,
}

/// Repository for `prompt_sessions` and `prompt_messages`.
pub struct SessionRepository;

impl SessionRepository {
    /// Create a session for `(exam, participant)`.
    pub async fn create(
        pool: &DatabasePool,
        exam_id: i64,
        participant_id: i64,
        spec_id: Option<i64>,
    ) -> Result<PromptSession> {
        let now = Utc::now().to_rfc3339();
        let session = sqlx::query_as::<_, PromptSession>(
            "INSERT INTO prompt_sessions (exam_id, participant_id, spec_id, started_at, total_tokens)
             VALUES (?, ?, ?, ?, 0)
             RETURNING *",
        )
        .bind(exam_id)
        .bind(participant_id)
        .bind(spec_id)
        .bind(&now)
        .fetch_one(pool)
        .await?;
        Ok(session)
    }

    /// The open session of `(exam, participant)`, if any.
    pub async fn get_active(
        pool: &DatabasePool,
        exam_id: i64,
        participant_id: i64,
    ) -> Result<Option<PromptSession>> {
        let session = sqlx::query_as::<_, PromptSession>(
            "SELECT * FROM prompt_sessions
             WHERE exam_id = ? AND participant_id = ? AND ended_at IS NULL",
        )
        .bind(exam_id)
        .bind(participant_id)
        .fetch_optional(pool)
        .await?;
        Ok(session)
    }

    /// The open session, created when missing. A concurrent creator losing
    /// the open-session uniqueness race falls back to the winner's row.
    pub async fn get_or_create(
        pool: &DatabasePool,
        exam_id: i64,
        participant_id: i64,
        spec_id: Option<i64>,
    ) -> Result<PromptSession> {
        if let Some(session) = Self::get_active(pool, exam_id, participant_id).await? {
            return Ok(session);
        }
        match Self::create(pool, exam_id, participant_id, spec_id).await {
            Ok(session) => Ok(session),
            Err(e) if e.is_unique_violation() => Self::get_active(pool, exam_id, participant_id)
                .await?
                .ok_or_else(|| {
                    StorageError::NotFound(format!(
                        "open session for exam {exam_id} participant {participant_id}"
                    ))
                }),
            Err(e) => Err(e),
        }
    }

    /// Fetch a session by id.
    pub async fn get_by_id(pool: &DatabasePool, id: i64) -> Result<Option<PromptSession>> {
        let session = sqlx::query_as::<_, PromptSession>("SELECT * FROM prompt_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(session)
    }

    /// Close a session.
    pub async fn end_session(pool: &DatabasePool, id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE prompt_sessions SET ended_at = ? WHERE id = ? AND ended_at IS NULL")
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Accumulate tokens onto the session counter.
    pub async fn add_tokens(pool: &DatabasePool, id: i64, tokens: i64) -> Result<()> {
        sqlx::query("UPDATE prompt_sessions SET total_tokens = total_tokens + ? WHERE id = ?")
            .bind(tokens)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Save a message. `turn = None` assigns the next turn atomically;
    /// `turn = Some(n)` is idempotent on `(session, turn, role)`.
    pub async fn save_message(
        pool: &DatabasePool,
        session_id: i64,
        turn: Option<i64>,
        role: MessageRole,
        content: &str,
        token_count: i64,
        meta: Option<&serde_json::Value>,
    ) -> Result<SavedMessage> {
        let now = Utc::now().to_rfc3339();
        let meta_text = meta.map(|m| m.to_string());

        if let Some(turn) = turn {
            if let Some(existing) = Self::find_message(pool, session_id, turn, role).await? {
                return Ok(SavedMessage {
                    id: existing.id,
                    turn,
                    already_existed: true,
                });
            }
            let insert = sqlx::query_as::<_, PromptMessage>(
                "INSERT INTO prompt_messages
                     (session_id, turn, role, content, token_count, meta, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 RETURNING *",
            )
            .bind(session_id)
            .bind(turn)
            .bind(role.as_str())
            .bind(content)
            .bind(token_count)
            .bind(&meta_text)
            .bind(&now)
            .fetch_one(pool)
            .await;
            return match insert {
                Ok(row) => Ok(SavedMessage {
                    id: row.id,
                    turn: row.turn,
                    already_existed: false,
                }),
                Err(e) => {
                    let err = StorageError::from(e);
                    if err.is_unique_violation() {
                        // Lost the race to an identical save.
                        let existing = Self::find_message(pool, session_id, turn, role)
                            .await?
                            .ok_or(err)?;
                        Ok(SavedMessage {
                            id: existing.id,
                            turn,
                            already_existed: true,
                        })
                    } else {
                        Err(err)
                    }
                }
            };
        }

        // Atomic next-turn assignment: the aggregate and the insert are one
        // statement, so concurrent writers serialize on the row lock and
        // produce consecutive turns.
        let row = sqlx::query_as::<_, PromptMessage>(
            "INSERT INTO prompt_messages
                 (session_id, turn, role, content, token_count, meta, created_at)
             SELECT ?1, COALESCE(MAX(turn), 0) + 1, ?2, ?3, ?4, ?5, ?6
             FROM prompt_messages WHERE session_id = ?1
             RETURNING *",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(token_count)
        .bind(&meta_text)
        .bind(&now)
        .fetch_one(pool)
        .await?;

        Ok(SavedMessage {
            id: row.id,
            turn: row.turn,
            already_existed: false,
        })
    }

    /// Fetch a specific message.
    pub async fn find_message(
        pool: &DatabasePool,
        session_id: i64,
        turn: i64,
        role: MessageRole,
    ) -> Result<Option<PromptMessage>> {
        let message = sqlx::query_as::<_, PromptMessage>(
            "SELECT * FROM prompt_messages WHERE session_id = ? AND turn = ? AND role = ?",
        )
        .bind(session_id)
        .bind(turn)
        .bind(role.as_str())
        .fetch_optional(pool)
        .await?;
        Ok(message)
    }

    /// Messages of a session ordered by turn, then insertion (USER before AI
    /// within a turn).
    pub async fn get_messages(
        pool: &DatabasePool,
        session_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<PromptMessage>> {
        let query = match limit {
            Some(_) => {
                "SELECT * FROM prompt_messages WHERE session_id = ?
                 ORDER BY turn ASC, id ASC LIMIT ?"
            }
            None => {
                "SELECT * FROM prompt_messages WHERE session_id = ?
                 ORDER BY turn ASC, id ASC"
            }
        };
        let mut q = sqlx::query_as::<_, PromptMessage>(query).bind(session_id);
        if let Some(limit) = limit {
            q = q.bind(limit);
        }
        Ok(q.fetch_all(pool).await?)
    }

    /// Highest turn stored for a session (0 when empty).
    pub async fn max_turn(pool: &DatabasePool, session_id: i64) -> Result<i64> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(turn) FROM prompt_messages WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(pool)
                .await?;
        Ok(row.0.unwrap_or(0))
    }
}
