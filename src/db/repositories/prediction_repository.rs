use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Prediction, PredictionRow};

const PREDICTION_COLUMNS: &str = "id, job_id, model_version, lead_score, confidence, \
     classification, probabilities, feature_importance, members, inference_ms, created_at";

#[derive(Debug, Clone)]
pub struct PredictionRepository {
    pool: PgPool,
}

impl PredictionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        job_id: &Uuid,
        prediction: &Prediction,
    ) -> Result<PredictionRow, AppError> {
        sqlx::query_as::<_, PredictionRow>(&format!(
            "INSERT INTO predictions \
                 (id, job_id, model_version, lead_score, confidence, classification, \
                  probabilities, feature_importance, members, inference_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {PREDICTION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(&prediction.model_version)
        .bind(prediction.lead_score)
        .bind(prediction.confidence)
        .bind(prediction.classification.as_str())
        .bind(serde_json::to_value(prediction.probabilities)?)
        .bind(serde_json::to_value(&prediction.feature_importance)?)
        .bind(serde_json::to_value(&prediction.members)?)
        .bind(prediction.inference_ms as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert prediction: {}", e)))
    }

    pub async fn latest_for_job(&self, job_id: &Uuid) -> Result<Option<PredictionRow>, AppError> {
        sqlx::query_as::<_, PredictionRow>(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions \
             WHERE job_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch prediction: {}", e)))
    }

    /// Low-confidence predictions, most uncertain first. Feeds the
    /// uncertainty sweep of the learning loop.
    pub async fn list_uncertain(
        &self,
        confidence_below: f64,
        limit: i64,
    ) -> Result<Vec<PredictionRow>, AppError> {
        sqlx::query_as::<_, PredictionRow>(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions \
             WHERE confidence < $1 ORDER BY confidence ASC LIMIT $2"
        ))
        .bind(confidence_below)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list uncertain predictions: {}", e)))
    }

    /// Predictions of one model version family over a recent window; used
    /// for the confidence-proxy performance estimate.
    pub async fn list_recent(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PredictionRow>, AppError> {
        sqlx::query_as::<_, PredictionRow>(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE created_at > $1"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list recent predictions: {}", e)))
    }
}
