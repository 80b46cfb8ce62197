use sqlx::PgPool;

use crate::error::AppError;
use crate::models::ModelArtifactRow;

const ARTIFACT_COLUMNS: &str = "model_name, version, metrics, training_samples, feature_count, \
     size_bytes, performance_trend, trained_at";

#[derive(Debug, Clone)]
pub struct ModelArtifactRepository {
    pool: PgPool,
}

impl ModelArtifactRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a registered model version. Rows are insert-only; an existing
    /// (name, version) pair is a conflict, never an update.
    pub async fn insert(&self, row: &ModelArtifactRow) -> Result<(), AppError> {
        sqlx::query(&format!(
            "INSERT INTO model_artifacts ({ARTIFACT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(&row.model_name)
        .bind(row.version)
        .bind(&row.metrics)
        .bind(row.training_samples)
        .bind(row.feature_count)
        .bind(row.size_bytes)
        .bind(&row.performance_trend)
        .bind(row.trained_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::AlreadyExists(
                format!("Model {} version {} already registered", row.model_name, row.version),
            ),
            _ => AppError::Database(format!("Failed to insert model artifact: {}", e)),
        })?;
        Ok(())
    }

    pub async fn latest(&self, model_name: &str) -> Result<Option<ModelArtifactRow>, AppError> {
        sqlx::query_as::<_, ModelArtifactRow>(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM model_artifacts \
             WHERE model_name = $1 ORDER BY version DESC LIMIT 1"
        ))
        .bind(model_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch latest artifact: {}", e)))
    }

    pub async fn list_versions(&self, model_name: &str) -> Result<Vec<ModelArtifactRow>, AppError> {
        sqlx::query_as::<_, ModelArtifactRow>(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM model_artifacts \
             WHERE model_name = $1 ORDER BY version DESC"
        ))
        .bind(model_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list artifact versions: {}", e)))
    }

    pub async fn list_all(&self) -> Result<Vec<ModelArtifactRow>, AppError> {
        sqlx::query_as::<_, ModelArtifactRow>(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM model_artifacts \
             ORDER BY model_name ASC, version DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list artifacts: {}", e)))
    }
}
