use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::DashboardSnapshot;

const SNAPSHOT_COLUMNS: &str = "id, user_id, total_analyses, valid_leads, type_distribution, \
     status_distribution, monthly_series, record_count, calculation_ms, expires_at, created_at";

#[derive(Debug, Clone)]
pub struct DashboardRepository {
    pool: PgPool,
}

impl DashboardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A snapshot that is still valid (`expires_at > now`), if any.
    pub async fn get_valid(
        &self,
        user_id: Option<&Uuid>,
    ) -> Result<Option<DashboardSnapshot>, AppError> {
        let query = match user_id {
            Some(_) => format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM dashboard_snapshots \
                 WHERE user_id = $1 AND expires_at > NOW() \
                 ORDER BY created_at DESC LIMIT 1"
            ),
            None => format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM dashboard_snapshots \
                 WHERE user_id IS NULL AND expires_at > NOW() \
                 ORDER BY created_at DESC LIMIT 1"
            ),
        };
        let mut q = sqlx::query_as::<_, DashboardSnapshot>(&query);
        if let Some(uid) = user_id {
            q = q.bind(*uid);
        }
        q.fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to fetch snapshot: {}", e)))
    }

    pub async fn upsert(
        &self,
        user_id: Option<&Uuid>,
        total_analyses: i64,
        valid_leads: i64,
        type_distribution: serde_json::Value,
        status_distribution: serde_json::Value,
        monthly_series: serde_json::Value,
        record_count: i64,
        calculation_ms: i64,
        ttl_secs: u64,
    ) -> Result<DashboardSnapshot, AppError> {
        let expires_at: DateTime<Utc> = Utc::now() + Duration::seconds(ttl_secs as i64);
        sqlx::query_as::<_, DashboardSnapshot>(&format!(
            "INSERT INTO dashboard_snapshots \
                 (id, user_id, total_analyses, valid_leads, type_distribution, \
                  status_distribution, monthly_series, record_count, calculation_ms, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {SNAPSHOT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id.copied())
        .bind(total_analyses)
        .bind(valid_leads)
        .bind(type_distribution)
        .bind(status_distribution)
        .bind(monthly_series)
        .bind(record_count)
        .bind(calculation_ms)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to upsert snapshot: {}", e)))
    }

    pub async fn cleanup_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM dashboard_snapshots WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to cleanup snapshots: {}", e)))?;
        Ok(result.rows_affected())
    }

    /// Aggregate job/prediction counts for the snapshot computation.
    pub async fn aggregate_for_user(
        &self,
        user_id: Option<&Uuid>,
    ) -> Result<DashboardAggregates, AppError> {
        let scope_clause = match user_id {
            Some(_) => "WHERE j.user_id = $1",
            None => "",
        };

        let status_query = format!(
            "SELECT j.status AS bucket, COUNT(*) AS n FROM jobs j {scope_clause} GROUP BY j.status"
        );
        let mut q = sqlx::query(&status_query);
        if let Some(uid) = user_id {
            q = q.bind(*uid);
        }
        let status_rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to aggregate statuses: {}", e)))?;

        let mut status_distribution = serde_json::Map::new();
        let mut total_analyses = 0i64;
        for row in &status_rows {
            let bucket: String = row.get("bucket");
            let n: i64 = row.get("n");
            total_analyses += n;
            status_distribution.insert(bucket, serde_json::json!(n));
        }

        let class_query = format!(
            "SELECT p.classification AS bucket, COUNT(*) AS n \
             FROM predictions p JOIN jobs j ON j.id = p.job_id {scope_clause} \
             GROUP BY p.classification"
        );
        let mut q = sqlx::query(&class_query);
        if let Some(uid) = user_id {
            q = q.bind(*uid);
        }
        let class_rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to aggregate classes: {}", e)))?;

        let mut type_distribution = serde_json::Map::new();
        let mut valid_leads = 0i64;
        for row in &class_rows {
            let bucket: String = row.get("bucket");
            let n: i64 = row.get("n");
            if bucket == "high" || bucket == "medium" {
                valid_leads += n;
            }
            type_distribution.insert(bucket, serde_json::json!(n));
        }

        let monthly_query = format!(
            "SELECT to_char(date_trunc('month', j.created_at), 'YYYY-MM') AS bucket, COUNT(*) AS n \
             FROM jobs j {scope_clause} \
             GROUP BY 1 ORDER BY 1 DESC LIMIT 12"
        );
        let mut q = sqlx::query(&monthly_query);
        if let Some(uid) = user_id {
            q = q.bind(*uid);
        }
        let monthly_rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to aggregate months: {}", e)))?;

        let monthly_series: Vec<serde_json::Value> = monthly_rows
            .iter()
            .map(|row| {
                let bucket: String = row.get("bucket");
                let n: i64 = row.get("n");
                serde_json::json!({ "month": bucket, "analyses": n })
            })
            .collect();

        Ok(DashboardAggregates {
            total_analyses,
            valid_leads,
            status_distribution: serde_json::Value::Object(status_distribution),
            type_distribution: serde_json::Value::Object(type_distribution),
            monthly_series: serde_json::Value::Array(monthly_series),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DashboardAggregates {
    pub total_analyses: i64,
    pub valid_leads: i64,
    pub status_distribution: serde_json::Value,
    pub type_distribution: serde_json::Value,
    pub monthly_series: serde_json::Value,
}
