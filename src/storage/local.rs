use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use super::{
    ByteStream, DynWriter, ObjectMeta, ObjectStorage, PresignMethod, PutBody, PutResult,
    StorageError, StorageResult,
};
use crate::error::AppError;

/// Filesystem-backed object store. Keys map directly to paths under the
/// configured root; writes go through a sibling temp file and rename so a
/// crash never leaves a half-written object behind.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: &str) -> Result<Self, AppError> {
        let root = PathBuf::from(root);
        std::fs::create_dir_all(&root).map_err(|e| {
            AppError::Configuration(format!("Cannot create storage root {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        // Keys are forward-slash paths; reject traversal components.
        if key.is_empty() || key.split('/').any(|part| part == ".." || part == ".") {
            return Err(StorageError::PermissionDenied(format!("invalid key '{}'", key)));
        }
        Ok(self.root.join(key))
    }

    async fn walk(&self, dir: &Path, out: &mut Vec<ObjectMeta>) -> StorageResult<()> {
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::Backend(e.to_string())),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?
            {
                let path = entry.path();
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                if meta.is_dir() {
                    stack.push(path);
                } else {
                    let key = path
                        .strip_prefix(&self.root)
                        .map_err(|e| StorageError::Backend(e.to_string()))?
                        .to_string_lossy()
                        .replace(std::path::MAIN_SEPARATOR, "/");
                    out.push(ObjectMeta { key, size: meta.len() });
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStorage for LocalStorage {
    async fn put(
        &self,
        key: &str,
        body: PutBody,
        _content_type: &str,
        _metadata: HashMap<String, String>,
    ) -> StorageResult<PutResult> {
        let target = self.resolve(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }

        let tmp = target.with_extension("tmp-write");
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        {
            let mut out = tokio::fs::File::create(&tmp)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            match body {
                PutBody::Bytes(bytes) => {
                    hasher.update(&bytes);
                    size = bytes.len() as u64;
                    out.write_all(&bytes)
                        .await
                        .map_err(|e| StorageError::Backend(e.to_string()))?;
                }
                PutBody::File(path) => {
                    let mut input = tokio::fs::File::open(&path)
                        .await
                        .map_err(|e| StorageError::Backend(e.to_string()))?;
                    let mut buf = vec![0u8; 64 * 1024];
                    loop {
                        let n = input
                            .read(&mut buf)
                            .await
                            .map_err(|e| StorageError::Backend(e.to_string()))?;
                        if n == 0 {
                            break;
                        }
                        hasher.update(&buf[..n]);
                        size += n as u64;
                        out.write_all(&buf[..n])
                            .await
                            .map_err(|e| StorageError::Backend(e.to_string()))?;
                    }
                }
            }
            out.sync_all()
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(PutResult {
            etag: hex::encode(hasher.finalize()),
            size,
        })
    }

    async fn get(&self, key: &str, mut writer: DynWriter<'_>) -> StorageResult<u64> {
        let path = self.resolve(key)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(StorageError::Backend(e.to_string())),
        };
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            total += n as u64;
        }
        Ok(total)
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::Backend(e.to_string())),
        }
    }

    async fn stream(&self, key: &str, chunk_bytes: usize) -> StorageResult<ByteStream> {
        let path = self.resolve(key)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(StorageError::Backend(e.to_string())),
        };
        let stream = ReaderStream::with_capacity(file, chunk_bytes.max(1))
            .map(|chunk| chunk.map_err(|e| StorageError::Backend(e.to_string())));
        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::Backend(e.to_string())),
        }
    }

    async fn delete_many(&self, keys: &[String]) -> StorageResult<HashMap<String, bool>> {
        let mut results = HashMap::new();
        for key in keys {
            let ok = self.delete(key).await.is_ok();
            results.insert(key.clone(), ok);
        }
        Ok(results)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?)
    }

    async fn list(
        &self,
        prefix: &str,
        max: usize,
        cursor: Option<String>,
    ) -> StorageResult<(Vec<ObjectMeta>, Option<String>)> {
        // Collect everything under the nearest directory, then filter by
        // the full prefix and paginate lexicographically by key.
        let dir_part = prefix.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        let start_dir = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dir_part)?
        };

        let mut all = Vec::new();
        self.walk(&start_dir, &mut all).await?;
        all.retain(|o| o.key.starts_with(prefix));
        all.sort_by(|a, b| a.key.cmp(&b.key));

        if let Some(cursor) = cursor {
            all.retain(|o| o.key > cursor);
        }

        let next = if all.len() > max {
            all.truncate(max);
            all.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok((all, next))
    }

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<()> {
        let src_path = self.resolve(src)?;
        let dst_path = self.resolve(dst)?;
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        match tokio::fs::copy(&src_path, &dst_path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(src.to_string()))
            }
            Err(e) => Err(StorageError::Backend(e.to_string())),
        }
    }

    async fn presigned_url(
        &self,
        key: &str,
        _ttl: Duration,
        _method: PresignMethod,
    ) -> StorageResult<String> {
        let path = self.resolve(key)?;
        Ok(format!("file://{}", path.display()))
    }

    async fn health_check(&self) -> StorageResult<()> {
        tokio::fs::try_exists(&self.root)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?
            .then_some(())
            .ok_or_else(|| StorageError::ConnectionFailed("storage root missing".to_string()))
    }

    fn strategy(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::delete_prefix;

    async fn fixture() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap()).unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (_dir, storage) = fixture().await;
        let result = storage
            .put(
                "documents/u/j/edital.pdf",
                PutBody::Bytes(Bytes::from_static(b"%PDF-1.4 test")),
                "application/pdf",
                HashMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.size, 13);

        let data = storage.get_bytes("documents/u/j/edital.pdf").await.unwrap();
        assert_eq!(&data[..], b"%PDF-1.4 test");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, storage) = fixture().await;
        let err = storage.get_bytes("documents/missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let (_dir, storage) = fixture().await;
        let err = storage.get_bytes("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StorageError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_list_with_pagination() {
        let (_dir, storage) = fixture().await;
        for i in 0..5 {
            storage
                .put(
                    &format!("documents/u/j/file-{}.txt", i),
                    PutBody::Bytes(Bytes::from_static(b"x")),
                    "text/plain",
                    HashMap::new(),
                )
                .await
                .unwrap();
        }
        let (page1, cursor) = storage.list("documents/u/j/", 2, None).await.unwrap();
        assert_eq!(page1.len(), 2);
        let cursor = cursor.unwrap();
        let (page2, _) = storage.list("documents/u/j/", 10, Some(cursor)).await.unwrap();
        assert_eq!(page2.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_prefix_removes_all_job_objects() {
        let (_dir, storage) = fixture().await;
        for name in ["a.pdf", "b.pdf"] {
            storage
                .put(
                    &format!("documents/u/j/{}", name),
                    PutBody::Bytes(Bytes::from_static(b"x")),
                    "application/pdf",
                    HashMap::new(),
                )
                .await
                .unwrap();
        }
        storage
            .put(
                "documents/u/other/keep.pdf",
                PutBody::Bytes(Bytes::from_static(b"x")),
                "application/pdf",
                HashMap::new(),
            )
            .await
            .unwrap();

        let removed = delete_prefix(&storage, "documents/u/j/").await.unwrap();
        assert_eq!(removed, 2);
        assert!(storage.exists("documents/u/other/keep.pdf").await.unwrap());
        assert!(!storage.exists("documents/u/j/a.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_stream_reads_in_chunks() {
        let (_dir, storage) = fixture().await;
        let payload: Vec<u8> = (0..100u8).collect();
        storage
            .put(
                "documents/u/j/blob",
                PutBody::Bytes(Bytes::from(payload.clone())),
                "application/octet-stream",
                HashMap::new(),
            )
            .await
            .unwrap();

        let mut stream = storage.stream("documents/u/j/blob", 16).await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, payload);
    }
}
