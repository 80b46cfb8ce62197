use sqlx::PgPool;
use uuid::Uuid;

use crate::db::pool_ext::read_with_retry;
use crate::error::AppError;
use crate::models::{AnalysisPoint, AnalysisPointRow, TextAnalysis};

#[derive(Debug, Clone)]
pub struct AnalysisRepository {
    pool: PgPool,
}

impl AnalysisRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the single TextAnalysis of a job. The record is immutable;
    /// a second insert for the same job is rejected by the unique index.
    pub async fn insert_text_analysis(
        &self,
        job_id: &Uuid,
        entities: serde_json::Value,
        keywords: serde_json::Value,
        business_indicators: serde_json::Value,
        financial_data: serde_json::Value,
    ) -> Result<TextAnalysis, AppError> {
        sqlx::query_as::<_, TextAnalysis>(
            "INSERT INTO text_analyses (id, job_id, entities, keywords, business_indicators, financial_data) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, job_id, entities, keywords, business_indicators, financial_data, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(entities)
        .bind(keywords)
        .bind(business_indicators)
        .bind(financial_data)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::AlreadyExists(format!("Text analysis for job {} already exists", job_id))
            }
            _ => AppError::Database(format!("Failed to insert text analysis: {}", e)),
        })
    }

    pub async fn get_text_analysis(&self, job_id: &Uuid) -> Result<Option<TextAnalysis>, AppError> {
        sqlx::query_as::<_, TextAnalysis>(
            "SELECT id, job_id, entities, keywords, business_indicators, financial_data, created_at \
             FROM text_analyses WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch text analysis: {}", e)))
    }

    /// Persist the ordered analysis points of a job. `sort_order` freezes
    /// the deterministic order computed by the analyzer.
    pub async fn insert_points(
        &self,
        job_id: &Uuid,
        points: &[AnalysisPoint],
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin point insert: {}", e)))?;

        for (order, point) in points.iter().enumerate() {
            sqlx::query(
                "INSERT INTO analysis_points \
                     (id, job_id, point_id, title, comment, status, category, priority, \
                      page_reference, raw_value, details, sort_order) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(Uuid::new_v4())
            .bind(job_id)
            .bind(&point.id)
            .bind(&point.title)
            .bind(&point.comment)
            .bind(point.status.as_str())
            .bind(point.category.as_str())
            .bind(point.priority.as_str())
            .bind(point.page_reference.map(|p| p as i32))
            .bind(&point.raw_value)
            .bind(&point.details)
            .bind(order as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert analysis point: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit point insert: {}", e)))?;
        Ok(())
    }

    pub async fn points_for_job(&self, job_id: &Uuid) -> Result<Vec<AnalysisPointRow>, AppError> {
        let pool = self.pool.clone();
        let job_id = *job_id;
        read_with_retry("analysis.points_for_job", move || {
            let pool = pool.clone();
            async move {
                sqlx::query_as::<_, AnalysisPointRow>(
                    "SELECT id, job_id, point_id, title, comment, status, category, priority, \
                            page_reference, raw_value, details, sort_order, created_at \
                     FROM analysis_points WHERE job_id = $1 ORDER BY sort_order ASC",
                )
                .bind(job_id)
                .fetch_all(&pool)
                .await
                .map_err(AppError::from)
            }
        })
        .await
    }
}
