use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of a submitted document.
///
/// Transitions are monotonic (uploaded -> processing -> analyzing ->
/// completed | failed); a failed job may go back to uploaded on explicit
/// retry, incrementing the retry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Uploaded,
    Processing,
    Analyzing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Processing => "processing",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(JobStatus::Uploaded),
            "processing" => Some(JobStatus::Processing),
            "analyzing" => Some(JobStatus::Analyzing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Uploaded, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Analyzing)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Analyzing, JobStatus::Completed)
                | (JobStatus::Analyzing, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::Uploaded)
        )
    }
}

/// Per-job processing options carried in the `config` column.
///
/// The column is JSONB but the set of keys is closed; the struct is the
/// source of truth and unknown keys are dropped on parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobConfig {
    pub temp_path: Option<String>,
    pub task_id: Option<Uuid>,
    pub total_pages: Option<u32>,
    pub enhanced_analysis: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub user_id: Uuid,
    pub filename: String,
    pub title: Option<String>,
    pub file_size: i64,
    pub file_hash: String,
    pub page_count: Option<i32>,
    pub status: String,
    pub config: serde_json::Value,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    pub fn parsed_config(&self) -> JobConfig {
        serde_json::from_value(self.config.clone()).unwrap_or_default()
    }

    /// Storage key of the original uploaded object.
    pub fn storage_key(&self) -> String {
        format!("documents/{}/{}/{}", self.user_id, self.id, self.filename)
    }

    /// Prefix under which every object of this job lives.
    pub fn storage_prefix(&self) -> String {
        format!("documents/{}/{}/", self.user_id, self.id)
    }
}

#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub user_id: Uuid,
    pub filename: String,
    pub file_size: i64,
    pub file_hash: String,
    pub config: JobConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in ["uploaded", "processing", "analyzing", "completed", "failed"] {
            let parsed = JobStatus::parse(s).unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!(JobStatus::parse("queued").is_none());
    }

    #[test]
    fn test_state_machine_transitions() {
        assert!(JobStatus::Uploaded.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Analyzing));
        assert!(JobStatus::Analyzing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Uploaded));

        assert!(!JobStatus::Uploaded.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Uploaded.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_config_parses_known_keys_only() {
        let raw = serde_json::json!({
            "tempPath": "/tmp/upload-1.pdf",
            "enhancedAnalysis": true,
            "somethingElse": 42
        });
        let cfg: JobConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(cfg.temp_path.as_deref(), Some("/tmp/upload-1.pdf"));
        assert!(cfg.enhanced_analysis);
        assert!(cfg.task_id.is_none());
    }
}
