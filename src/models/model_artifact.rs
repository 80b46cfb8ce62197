use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Evaluation metrics recorded when a model version is registered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub auc: f64,
    pub rmse: f64,
}

/// Registry metadata of a trained model version. Registered once, never
/// mutated; older versions remain addressable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ModelArtifactRow {
    pub model_name: String,
    pub version: i64,
    pub metrics: serde_json::Value,
    pub training_samples: i64,
    pub feature_count: i32,
    pub size_bytes: i64,
    pub performance_trend: String,
    pub trained_at: DateTime<Utc>,
}
