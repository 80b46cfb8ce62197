use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Precomputed dashboard aggregate for one user (or the global scope when
/// `user_id` is null).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DashboardSnapshot {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub total_analyses: i64,
    pub valid_leads: i64,
    pub type_distribution: serde_json::Value,
    pub status_distribution: serde_json::Value,
    pub monthly_series: serde_json::Value,
    pub record_count: i64,
    pub calculation_ms: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Shape served to the dashboard endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_analyses: i64,
    pub valid_leads: i64,
    pub type_distribution: serde_json::Value,
    pub status_distribution: serde_json::Value,
    pub monthly_series: serde_json::Value,
    pub cached: bool,
    pub expires_at: DateTime<Utc>,
}
