use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::storage::{ObjectStorage, PutBody};

/// Append-only JSONL feedback log on local disk, one file per month
/// (`feedback/YYYY-MM.jsonl`). Appends rewrite through a temp file with
/// fsync and rename, so a crash never leaves a torn line behind.
/// `archive` ships consumed files to object storage under
/// `feedback/processed/` and clears them locally.
pub struct FeedbackLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FeedbackLog {
    pub fn new(dir: &str) -> AppResult<Self> {
        let dir = PathBuf::from(dir);
        std::fs::create_dir_all(&dir).map_err(|e| {
            AppError::Configuration(format!("Cannot create feedback dir {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir, write_lock: Mutex::new(()) })
    }

    fn current_file(&self) -> PathBuf {
        self.dir.join(format!("{}.jsonl", Utc::now().format("%Y-%m")))
    }

    pub async fn append(&self, record: &serde_json::Value) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.current_file();
        let line = serde_json::to_string(record)?;

        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> AppResult<()> {
            let existing = match std::fs::read(&path) {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                Err(e) => return Err(AppError::Storage(e.to_string())),
            };

            let mut tmp = tempfile::NamedTempFile::new_in(&dir)
                .map_err(|e| AppError::Storage(e.to_string()))?;
            tmp.write_all(&existing)
                .and_then(|_| tmp.write_all(line.as_bytes()))
                .and_then(|_| tmp.write_all(b"\n"))
                .and_then(|_| tmp.as_file().sync_all())
                .map_err(|e| AppError::Storage(e.to_string()))?;
            tmp.persist(&path)
                .map_err(|e| AppError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("feedback append panicked: {}", e)))?
    }

    /// Every record across all month files, in file order.
    pub async fn load_all(&self) -> AppResult<Vec<serde_json::Value>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> AppResult<Vec<serde_json::Value>> {
            let mut records = Vec::new();
            let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
                .map_err(|e| AppError::Storage(e.to_string()))?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
                .collect();
            files.sort();

            for file in files {
                let content =
                    std::fs::read_to_string(&file).map_err(|e| AppError::Storage(e.to_string()))?;
                for line in content.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str(line) {
                        Ok(value) => records.push(value),
                        Err(e) => log::warn!("Skipping malformed feedback line: {}", e),
                    }
                }
            }
            Ok(records)
        })
        .await
        .map_err(|e| AppError::Internal(format!("feedback load panicked: {}", e)))?
    }

    pub async fn pending_count(&self) -> AppResult<usize> {
        Ok(self.load_all().await?.len())
    }

    /// Archives every month file to `feedback/processed/` in object
    /// storage and removes it locally.
    pub async fn archive(&self, storage: &dyn ObjectStorage) -> AppResult<usize> {
        let _guard = self.write_lock.lock().await;

        let mut archived = 0;
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "jsonl") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };

            let key = format!(
                "feedback/processed/{}-{}.jsonl",
                stem,
                Utc::now().timestamp()
            );
            storage
                .put(&key, PutBody::File(path.clone()), "application/jsonl", Default::default())
                .await
                .map_err(AppError::from)?;
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| AppError::Storage(e.to_string()))?;
            archived += 1;
            log::info!("Archived feedback file {} to {}", path.display(), key);
        }
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalStorage;

    #[tokio::test]
    async fn test_append_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let log = FeedbackLog::new(dir.path().to_str().unwrap()).unwrap();

        log.append(&serde_json::json!({ "jobId": "a", "score": 1 })).await.unwrap();
        log.append(&serde_json::json!({ "jobId": "b", "score": 2 })).await.unwrap();

        let records = log.load_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["jobId"], "a");
        assert_eq!(log.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_archive_moves_files_to_storage() {
        let feedback_dir = tempfile::tempdir().unwrap();
        let storage_dir = tempfile::tempdir().unwrap();
        let log = FeedbackLog::new(feedback_dir.path().to_str().unwrap()).unwrap();
        let storage = LocalStorage::new(storage_dir.path().to_str().unwrap()).unwrap();

        log.append(&serde_json::json!({ "jobId": "a" })).await.unwrap();
        let archived = log.archive(&storage).await.unwrap();
        assert_eq!(archived, 1);
        assert_eq!(log.pending_count().await.unwrap(), 0);

        let (objects, _) = storage.list("feedback/processed/", 10, None).await.unwrap();
        assert_eq!(objects.len(), 1);
    }
}
