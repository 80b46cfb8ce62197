use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{FeedbackRecord, FeedbackRequest};

#[derive(Debug, Clone)]
pub struct FeedbackRepository {
    pool: PgPool,
}

impl FeedbackRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_record(
        &self,
        job_id: &Uuid,
        answers: serde_json::Value,
        metadata: serde_json::Value,
    ) -> Result<FeedbackRecord, AppError> {
        sqlx::query_as::<_, FeedbackRecord>(
            "INSERT INTO feedback_records (id, job_id, answers, metadata, processed) \
             VALUES ($1, $2, $3, $4, false) \
             RETURNING id, job_id, answers, metadata, processed, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(answers)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert feedback record: {}", e)))
    }

    pub async fn list_unprocessed(&self) -> Result<Vec<FeedbackRecord>, AppError> {
        sqlx::query_as::<_, FeedbackRecord>(
            "SELECT id, job_id, answers, metadata, processed, created_at \
             FROM feedback_records WHERE processed = false ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list unprocessed feedback: {}", e)))
    }

    pub async fn list_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<FeedbackRecord>, AppError> {
        sqlx::query_as::<_, FeedbackRecord>(
            "SELECT id, job_id, answers, metadata, processed, created_at \
             FROM feedback_records WHERE created_at > $1 ORDER BY created_at ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list feedback since cutoff: {}", e)))
    }

    /// Archive processed records after a retraining cycle consumed them.
    pub async fn mark_processed(&self, ids: &[Uuid]) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE feedback_records SET processed = true WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to mark feedback processed: {}", e)))?;
        Ok(result.rows_affected())
    }

    pub async fn insert_request(
        &self,
        job_id: &Uuid,
        document_summary: serde_json::Value,
        current_prediction: serde_json::Value,
        questions: serde_json::Value,
        uncertainty_reason: &str,
    ) -> Result<FeedbackRequest, AppError> {
        sqlx::query_as::<_, FeedbackRequest>(
            "INSERT INTO feedback_requests \
                 (id, job_id, document_summary, current_prediction, questions, uncertainty_reason, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'pending') \
             ON CONFLICT (job_id) WHERE status = 'pending' DO UPDATE \
                 SET current_prediction = EXCLUDED.current_prediction, \
                     uncertainty_reason = EXCLUDED.uncertainty_reason \
             RETURNING id, job_id, document_summary, current_prediction, questions, \
                       uncertainty_reason, status, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(document_summary)
        .bind(current_prediction)
        .bind(questions)
        .bind(uncertainty_reason)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert feedback request: {}", e)))
    }

    pub async fn pending_requests(&self, limit: i64) -> Result<Vec<FeedbackRequest>, AppError> {
        sqlx::query_as::<_, FeedbackRequest>(
            "SELECT id, job_id, document_summary, current_prediction, questions, \
                    uncertainty_reason, status, created_at \
             FROM feedback_requests WHERE status = 'pending' \
             ORDER BY created_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list pending requests: {}", e)))
    }

    pub async fn mark_request_answered(&self, job_id: &Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE feedback_requests SET status = 'answered' \
             WHERE job_id = $1 AND status = 'pending'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to mark request answered: {}", e)))?;
        Ok(())
    }
}
