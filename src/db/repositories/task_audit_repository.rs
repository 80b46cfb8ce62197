use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

/// Write-once audit entries for tasks that exhausted their retries and
/// landed in the dead-letter queue.
#[derive(Debug, Clone)]
pub struct TaskAuditRepository {
    pool: PgPool,
}

impl TaskAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record_dead_letter(
        &self,
        task_id: &Uuid,
        queue: &str,
        kind: &str,
        attempts: i32,
        error_message: &str,
        payload: serde_json::Value,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO task_audit (id, task_id, queue, kind, attempts, error_message, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(task_id)
        .bind(queue)
        .bind(kind)
        .bind(attempts)
        .bind(error_message)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to record dead letter: {}", e)))?;
        Ok(())
    }
}
