use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Image metadata collected during chunk extraction. Pixel data is never
/// decoded or stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMeta {
    pub page: u32,
    pub index: usize,
    pub width: i64,
    pub height: i64,
    pub colorspace: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub job_id: Uuid,
    pub chunk_index: i32,
    pub page_start: i32,
    pub page_end: i32,
    pub raw_text: String,
    pub cleaned_text: Option<String>,
    pub images: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl DocumentChunk {
    pub fn image_metadata(&self) -> Vec<ImageMeta> {
        serde_json::from_value(self.images.clone()).unwrap_or_default()
    }

    /// Whether this chunk's page range covers the given 1-based page.
    pub fn covers_page(&self, page: i32) -> bool {
        page >= self.page_start && page <= self.page_end
    }
}

#[derive(Debug, Clone)]
pub struct NewChunk {
    pub job_id: Uuid,
    pub chunk_index: i32,
    pub page_start: i32,
    pub page_end: i32,
    pub raw_text: String,
    pub cleaned_text: Option<String>,
    pub images: Vec<ImageMeta>,
}
