pub mod local;
pub mod s3;

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use tokio::io::AsyncWrite;

use crate::config::settings::StorageConfig;
use crate::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for AppError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(key) => AppError::NotFound(format!("Object {}", key)),
            StorageError::PermissionDenied(msg) => AppError::Forbidden(msg),
            StorageError::ConnectionFailed(msg) => AppError::StorageConnection(msg),
            StorageError::Backend(msg) => AppError::Storage(msg),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Body of a `put`. Large uploads hand over a scratch file so backends can
/// stream it without holding the object in memory.
#[derive(Debug, Clone)]
pub enum PutBody {
    Bytes(Bytes),
    File(PathBuf),
}

impl PutBody {
    pub async fn len(&self) -> StorageResult<u64> {
        match self {
            PutBody::Bytes(b) => Ok(b.len() as u64),
            PutBody::File(path) => tokio::fs::metadata(path)
                .await
                .map(|m| m.len())
                .map_err(|e| StorageError::Backend(format!("stat {}: {}", path.display(), e))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PutResult {
    pub etag: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignMethod {
    Get,
    Put,
}

pub type ByteStream = BoxStream<'static, StorageResult<Bytes>>;
pub type DynWriter<'a> = Pin<&'a mut (dyn AsyncWrite + Send)>;

/// Uniform object store over the `documents/`, `models/` and `feedback/`
/// key layouts. Backend selection happens once at startup; callers only
/// ever see this trait.
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(
        &self,
        key: &str,
        body: PutBody,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> StorageResult<PutResult>;

    /// Streams the object into `writer` without buffering it whole.
    /// Returns the number of bytes written.
    async fn get(&self, key: &str, writer: DynWriter<'_>) -> StorageResult<u64>;

    /// Convenience for small objects (model artifacts, metadata files).
    async fn get_bytes(&self, key: &str) -> StorageResult<Bytes>;

    /// Chunked read stream with the given target chunk size.
    async fn stream(&self, key: &str, chunk_bytes: usize) -> StorageResult<ByteStream>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn delete_many(&self, keys: &[String]) -> StorageResult<HashMap<String, bool>>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    async fn list(
        &self,
        prefix: &str,
        max: usize,
        cursor: Option<String>,
    ) -> StorageResult<(Vec<ObjectMeta>, Option<String>)>;

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<()>;

    async fn presigned_url(
        &self,
        key: &str,
        ttl: Duration,
        method: PresignMethod,
    ) -> StorageResult<String>;

    async fn health_check(&self) -> StorageResult<()>;

    /// Short backend label surfaced in upload responses ("local" / "s3").
    fn strategy(&self) -> &'static str;
}

/// Move = copy then delete. Default path shared by both backends.
pub async fn move_object(storage: &dyn ObjectStorage, src: &str, dst: &str) -> StorageResult<()> {
    storage.copy(src, dst).await?;
    storage.delete(src).await
}

/// Deletes every object under the prefix. Used by cascading job deletion.
pub async fn delete_prefix(storage: &dyn ObjectStorage, prefix: &str) -> StorageResult<usize> {
    let mut removed = 0;
    let mut cursor = None;
    loop {
        let (objects, next) = storage.list(prefix, 1000, cursor).await?;
        if objects.is_empty() {
            break;
        }
        let keys: Vec<String> = objects.into_iter().map(|o| o.key).collect();
        let results = storage.delete_many(&keys).await?;
        removed += results.values().filter(|ok| **ok).count();
        match next {
            Some(c) => cursor = Some(c),
            None => break,
        }
    }
    Ok(removed)
}

/// Builds the configured backend. Selection never leaks past this point.
pub fn make_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>, AppError> {
    match config.backend.as_str() {
        "local" => Ok(Arc::new(local::LocalStorage::new(&config.local_path)?)),
        "s3" => {
            let bucket = config.s3_bucket.clone().ok_or_else(|| {
                AppError::Configuration("S3 backend selected without a bucket".to_string())
            })?;
            Ok(Arc::new(s3::S3Storage::new(
                bucket,
                config.s3_region.clone(),
                config.s3_endpoint_url.clone(),
                config.aws_access_key_id.clone().unwrap_or_default(),
                config.aws_secret_access_key.clone().unwrap_or_default(),
            )))
        }
        other => Err(AppError::Configuration(format!(
            "Unknown storage backend '{}'",
            other
        ))),
    }
}

/// Key of a job's original document.
pub fn document_key(user_id: &uuid::Uuid, job_id: &uuid::Uuid, filename: &str) -> String {
    format!("documents/{}/{}/{}", user_id, job_id, filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_key_layout() {
        let user = uuid::Uuid::nil();
        let job = uuid::Uuid::nil();
        assert_eq!(
            document_key(&user, &job, "edital.pdf"),
            format!("documents/{}/{}/edital.pdf", user, job)
        );
    }

    #[test]
    fn test_storage_error_maps_to_app_error() {
        let err: AppError = StorageError::NotFound("documents/x".to_string()).into();
        assert!(matches!(err, AppError::NotFound(_)));
        let err: AppError = StorageError::ConnectionFailed("refused".to_string()).into();
        assert!(err.is_retryable());
    }
}
