use sqlx::PgPool;
use uuid::Uuid;

use crate::db::pool_ext::read_with_retry;
use crate::error::AppError;
use crate::models::{DocumentChunk, NewChunk};

const CHUNK_COLUMNS: &str = "id, job_id, chunk_index, page_start, page_end, raw_text, \
     cleaned_text, images, status, created_at";

#[derive(Debug, Clone)]
pub struct ChunkRepository {
    pool: PgPool,
}

impl ChunkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bulk-insert chunks for a job inside one transaction so a partial
    /// write never becomes visible.
    pub async fn insert_many(&self, chunks: &[NewChunk]) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin chunk insert: {}", e)))?;

        for chunk in chunks {
            let images = serde_json::to_value(&chunk.images)?;
            sqlx::query(
                "INSERT INTO document_chunks \
                     (id, job_id, chunk_index, page_start, page_end, raw_text, cleaned_text, images, status) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'extracted') \
                 ON CONFLICT (job_id, chunk_index) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(chunk.job_id)
            .bind(chunk.chunk_index)
            .bind(chunk.page_start)
            .bind(chunk.page_end)
            .bind(&chunk.raw_text)
            .bind(&chunk.cleaned_text)
            .bind(images)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert chunk: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit chunk insert: {}", e)))?;
        Ok(())
    }

    /// Chunks of a job in index order.
    pub async fn list_for_job(&self, job_id: &Uuid) -> Result<Vec<DocumentChunk>, AppError> {
        let pool = self.pool.clone();
        let job_id = *job_id;
        read_with_retry("chunks.list_for_job", move || {
            let pool = pool.clone();
            async move {
                sqlx::query_as::<_, DocumentChunk>(&format!(
                    "SELECT {CHUNK_COLUMNS} FROM document_chunks \
                     WHERE job_id = $1 ORDER BY chunk_index ASC"
                ))
                .bind(job_id)
                .fetch_all(&pool)
                .await
                .map_err(AppError::from)
            }
        })
        .await
    }

    /// The chunk covering a 1-based page. With a nonzero overlap two chunks
    /// may cover the page; the lower index wins for stable output.
    pub async fn get_covering_page(
        &self,
        job_id: &Uuid,
        page: i32,
    ) -> Result<Option<DocumentChunk>, AppError> {
        let pool = self.pool.clone();
        let job_id = *job_id;
        read_with_retry("chunks.get_covering_page", move || {
            let pool = pool.clone();
            async move {
                sqlx::query_as::<_, DocumentChunk>(&format!(
                    "SELECT {CHUNK_COLUMNS} FROM document_chunks \
                     WHERE job_id = $1 AND page_start <= $2 AND page_end >= $2 \
                     ORDER BY chunk_index ASC LIMIT 1"
                ))
                .bind(job_id)
                .bind(page)
                .fetch_optional(&pool)
                .await
                .map_err(AppError::from)
            }
        })
        .await
    }

    pub async fn mark_analyzed(&self, job_id: &Uuid, chunk_index: i32) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE document_chunks SET status = 'analyzed' \
             WHERE job_id = $1 AND chunk_index = $2",
        )
        .bind(job_id)
        .bind(chunk_index)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to mark chunk analyzed: {}", e)))?;
        Ok(())
    }

    pub async fn count_analyzed(&self, job_id: &Uuid) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM document_chunks WHERE job_id = $1 AND status = 'analyzed'",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to count analyzed chunks: {}", e)))?;
        Ok(count.0)
    }

    pub async fn count_for_job(&self, job_id: &Uuid) -> Result<i64, AppError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM document_chunks WHERE job_id = $1")
                .bind(job_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::Database(format!("Failed to count chunks: {}", e)))?;
        Ok(count.0)
    }
}
