use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User-supplied correction for a prediction. Append-only until a
/// retraining cycle marks it processed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub answers: serde_json::Value,
    pub metadata: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// A pending request asking the user to grade an uncertain prediction.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedbackRequest {
    pub id: Uuid,
    pub job_id: Uuid,
    pub document_summary: serde_json::Value,
    pub current_prediction: serde_json::Value,
    pub questions: serde_json::Value,
    pub uncertainty_reason: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// One question of the fixed feedback questionnaire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackQuestion {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub question: String,
    pub options: Vec<String>,
}
