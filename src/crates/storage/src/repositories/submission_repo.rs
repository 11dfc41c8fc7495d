//! Submission repository.

use chrono::Utc;

use crate::db::DatabasePool;
use crate::error::Result;
use crate::models::{ScoreRow, SubmissionRow, SubmissionRunRow};

/// Repository for `submissions`, `submission_runs`, and `scores`.
pub struct SubmissionRepository;

impl SubmissionRepository {
    /// Record a submission.
    pub async fn create(
        pool: &DatabasePool,
        exam_id: i64,
        participant_id: i64,
        spec_id: Option<i64>,
        session_id: Option<i64>,
        code: &str,
        language: &str,
        status: &str,
    ) -> Result<SubmissionRow> {
        let now = Utc::now().to_rfc3339();
        let row = sqlx::query_as::<_, SubmissionRow>(
            "INSERT INTO submissions
                 (exam_id, participant_id, spec_id, session_id, code, language, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(exam_id)
        .bind(participant_id)
        .bind(spec_id)
        .bind(session_id)
        .bind(code)
        .bind(language)
        .bind(status)
        .bind(&now)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    /// Update the lifecycle status of a submission.
    pub async fn set_status(pool: &DatabasePool, id: i64, status: &str) -> Result<()> {
        sqlx::query("UPDATE submissions SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Record one per-test verdict.
    pub async fn add_run(
        pool: &DatabasePool,
        submission_id: i64,
        test_index: i64,
        verdict: &str,
        execution_time: f64,
        memory_used: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO submission_runs
                 (submission_id, test_index, verdict, execution_time, memory_used)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(submission_id)
        .bind(test_index)
        .bind(verdict)
        .bind(execution_time)
        .bind(memory_used)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record the final score (one per submission).
    #[allow(clippy::too_many_arguments)]
    pub async fn save_score(
        pool: &DatabasePool,
        submission_id: i64,
        prompt_score: Option<f64>,
        performance_score: Option<f64>,
        correctness_score: Option<f64>,
        total_score: Option<f64>,
        grade: Option<&str>,
        rubric: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let rubric_text = rubric.map(|r| r.to_string());
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO scores
                 (submission_id, prompt_score, performance_score, correctness_score,
                  total_score, grade, rubric, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (submission_id) DO UPDATE SET
                 prompt_score = excluded.prompt_score,
                 performance_score = excluded.performance_score,
                 correctness_score = excluded.correctness_score,
                 total_score = excluded.total_score,
                 grade = excluded.grade,
                 rubric = excluded.rubric
             RETURNING id",
        )
        .bind(submission_id)
        .bind(prompt_score)
        .bind(performance_score)
        .bind(correctness_score)
        .bind(total_score)
        .bind(grade)
        .bind(&rubric_text)
        .bind(&now)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    /// Fetch a submission.
    pub async fn get(pool: &DatabasePool, id: i64) -> Result<Option<SubmissionRow>> {
        let row = sqlx::query_as::<_, SubmissionRow>("SELECT * FROM submissions WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// Runs of a submission ordered by test index.
    pub async fn get_runs(pool: &DatabasePool, submission_id: i64) -> Result<Vec<SubmissionRunRow>> {
        let rows = sqlx::query_as::<_, SubmissionRunRow>(
            "SELECT * FROM submission_runs WHERE submission_id = ? ORDER BY test_index ASC",
        )
        .bind(submission_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Score of a submission.
    pub async fn get_score(pool: &DatabasePool, submission_id: i64) -> Result<Option<ScoreRow>> {
        let row = sqlx::query_as::<_, ScoreRow>("SELECT * FROM scores WHERE submission_id = ?")
            .bind(submission_id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }
}
