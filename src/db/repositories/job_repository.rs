use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::pool_ext::read_with_retry;
use crate::error::AppError;
use crate::models::{CreateJobRequest, Job, JobStatus};

const JOB_COLUMNS: &str = "id, user_id, filename, title, file_size, file_hash, page_count, \
     status, config, error_message, retry_count, created_at, started_at, completed_at";

#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new job in `uploaded` state.
    pub async fn create(&self, request: CreateJobRequest) -> Result<Job, AppError> {
        let config = serde_json::to_value(&request.config)?;
        let job = sqlx::query_as::<_, Job>(&format!(
            "INSERT INTO jobs (id, user_id, filename, file_size, file_hash, status, config) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.filename)
        .bind(request.file_size)
        .bind(&request.file_hash)
        .bind(JobStatus::Uploaded.as_str())
        .bind(config)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create job: {}", e)))?;

        Ok(job)
    }

    /// Fetch a job by id. Hot path: retried on transient connection loss.
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Job>, AppError> {
        let pool = self.pool.clone();
        let id = *id;
        read_with_retry("jobs.get_by_id", move || {
            let pool = pool.clone();
            async move {
                sqlx::query_as::<_, Job>(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(&pool)
                .await
                .map_err(AppError::from)
            }
        })
        .await
    }

    /// Enumerate a user's jobs with pagination and an optional status filter.
    pub async fn list_for_user(
        &self,
        user_id: &Uuid,
        status: Option<&str>,
        skip: i64,
        limit: i64,
    ) -> Result<(Vec<Job>, i64), AppError> {
        let pool = self.pool.clone();
        let user_id = *user_id;
        let status = status.map(|s| s.to_string());

        read_with_retry("jobs.list_for_user", move || {
            let pool = pool.clone();
            let status = status.clone();
            async move {
                let jobs = match &status {
                    Some(status) => {
                        sqlx::query_as::<_, Job>(&format!(
                            "SELECT {JOB_COLUMNS} FROM jobs \
                             WHERE user_id = $1 AND status = $2 \
                             ORDER BY created_at DESC LIMIT $3 OFFSET $4"
                        ))
                        .bind(user_id)
                        .bind(status)
                        .bind(limit)
                        .bind(skip)
                        .fetch_all(&pool)
                        .await
                    }
                    None => {
                        sqlx::query_as::<_, Job>(&format!(
                            "SELECT {JOB_COLUMNS} FROM jobs \
                             WHERE user_id = $1 \
                             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
                        ))
                        .bind(user_id)
                        .bind(limit)
                        .bind(skip)
                        .fetch_all(&pool)
                        .await
                    }
                }
                .map_err(AppError::from)?;

                let total: (i64,) = match &status {
                    Some(status) => {
                        sqlx::query_as(
                            "SELECT COUNT(*) FROM jobs WHERE user_id = $1 AND status = $2",
                        )
                        .bind(user_id)
                        .bind(status)
                        .fetch_one(&pool)
                        .await
                    }
                    None => {
                        sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE user_id = $1")
                            .bind(user_id)
                            .fetch_one(&pool)
                            .await
                    }
                }
                .map_err(AppError::from)?;

                Ok((jobs, total.0))
            }
        })
        .await
    }

    /// Compare-and-set status transition. Returns the updated job, or
    /// `InvalidJobState` when the job is no longer in `expected`.
    pub async fn transition_status(
        &self,
        id: &Uuid,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<Job, AppError> {
        if !expected.can_transition_to(next) {
            return Err(AppError::InvalidJobState {
                current: expected.as_str().to_string(),
                required: format!("a state that may move to '{}'", next.as_str()),
            });
        }
        let started_at = (next == JobStatus::Processing).then(Utc::now);
        let completed_at =
            matches!(next, JobStatus::Completed | JobStatus::Failed).then(Utc::now);

        let updated = sqlx::query_as::<_, Job>(&format!(
            "UPDATE jobs SET status = $1, \
                 started_at = COALESCE($2, started_at), \
                 completed_at = COALESCE($3, completed_at) \
             WHERE id = $4 AND status = $5 \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(next.as_str())
        .bind(started_at)
        .bind(completed_at)
        .bind(id)
        .bind(expected.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to transition job status: {}", e)))?;

        match updated {
            Some(job) => Ok(job),
            None => {
                let current = self
                    .get_by_id(id)
                    .await?
                    .map(|j| j.status)
                    .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
                Err(AppError::InvalidJobState {
                    current,
                    required: expected.as_str().to_string(),
                })
            }
        }
    }

    /// Record a terminal failure with its error message. The transition is
    /// CAS-guarded on the current status to preserve the state machine.
    pub async fn mark_failed(
        &self,
        id: &Uuid,
        from: JobStatus,
        error_message: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $1, error_message = $2, completed_at = $3 \
             WHERE id = $4 AND status = $5",
        )
        .bind(JobStatus::Failed.as_str())
        .bind(error_message)
        .bind(Utc::now())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to mark job failed: {}", e)))?;

        if result.rows_affected() == 0 {
            log::warn!("mark_failed skipped: job {} no longer in state {}", id, from.as_str());
        }
        Ok(())
    }

    /// Explicit retry: failed -> uploaded, retry count incremented, the
    /// previous error cleared.
    pub async fn reset_for_retry(&self, id: &Uuid) -> Result<Job, AppError> {
        let updated = sqlx::query_as::<_, Job>(&format!(
            "UPDATE jobs SET status = $1, error_message = NULL, \
                 retry_count = retry_count + 1, started_at = NULL, completed_at = NULL \
             WHERE id = $2 AND status = $3 \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(JobStatus::Uploaded.as_str())
        .bind(id)
        .bind(JobStatus::Failed.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to reset job for retry: {}", e)))?;

        match updated {
            Some(job) => Ok(job),
            None => {
                let current = self
                    .get_by_id(id)
                    .await?
                    .map(|j| j.status)
                    .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
                Err(AppError::InvalidJobState {
                    current,
                    required: JobStatus::Failed.as_str().to_string(),
                })
            }
        }
    }

    /// Persist validated PDF metadata on the job.
    pub async fn set_page_count(&self, id: &Uuid, page_count: i32) -> Result<(), AppError> {
        sqlx::query("UPDATE jobs SET page_count = $1 WHERE id = $2")
            .bind(page_count)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to set page count: {}", e)))?;
        Ok(())
    }

    pub async fn update_config(
        &self,
        id: &Uuid,
        config: &crate::models::JobConfig,
    ) -> Result<(), AppError> {
        let config = serde_json::to_value(config)?;
        sqlx::query("UPDATE jobs SET config = $1 WHERE id = $2")
            .bind(config)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to update job config: {}", e)))?;
        Ok(())
    }

    pub async fn set_title(&self, id: &Uuid, title: &str) -> Result<Job, AppError> {
        sqlx::query_as::<_, Job>(&format!(
            "UPDATE jobs SET title = $1 WHERE id = $2 RETURNING {JOB_COLUMNS}"
        ))
        .bind(title)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to set job title: {}", e)))?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))
    }

    /// Delete a job and every dependent row in a single transaction.
    /// Foreign keys cascade; the explicit deletes keep the operation
    /// honest even against a schema without ON DELETE CASCADE.
    pub async fn delete_cascade(&self, id: &Uuid) -> Result<bool, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin delete transaction: {}", e)))?;

        for table in [
            "analysis_points",
            "text_analyses",
            "predictions",
            "feedback_requests",
            "feedback_records",
            "document_chunks",
        ] {
            sqlx::query(&format!("DELETE FROM {} WHERE job_id = $1", table))
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::Database(format!("Failed to delete from {}: {}", table, e))
                })?;
        }

        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(format!("Failed to delete job: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit delete: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Completed jobs newer than the cutoff, used by the retraining triggers.
    pub async fn count_completed_since(
        &self,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs WHERE status = 'completed' AND completed_at > $1",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to count completed jobs: {}", e)))?;
        Ok(count.0)
    }

    /// All completed jobs, oldest capped, for dataset building.
    pub async fn list_completed(&self, limit: i64) -> Result<Vec<Job>, AppError> {
        sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'completed' \
             ORDER BY completed_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list completed jobs: {}", e)))
    }
}
