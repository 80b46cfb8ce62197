pub mod broker;
pub mod scheduler;
pub mod worker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use broker::TaskBroker;
pub use worker::{TaskHandler, WorkerPool};

/// Named queues. `Priority` drains first; the rest in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Priority,
    Pdf,
    Ml,
    Analysis,
    Notifications,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Priority => "priority",
            QueueName::Pdf => "pdf",
            QueueName::Ml => "ml",
            QueueName::Analysis => "analysis",
            QueueName::Notifications => "notifications",
        }
    }

    /// Drain order used by workers.
    pub const DRAIN_ORDER: [QueueName; 5] = [
        QueueName::Priority,
        QueueName::Pdf,
        QueueName::Ml,
        QueueName::Analysis,
        QueueName::Notifications,
    ];
}

/// Work item kinds routed through the queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "pdf.validate")]
    PdfValidate,
    #[serde(rename = "pdf.chunk")]
    PdfChunk,
    #[serde(rename = "analysis.chunk")]
    AnalysisChunk,
    #[serde(rename = "analysis.aggregate")]
    AnalysisAggregate,
    #[serde(rename = "ml.retrain")]
    MlRetrain,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::PdfValidate => "pdf.validate",
            TaskKind::PdfChunk => "pdf.chunk",
            TaskKind::AnalysisChunk => "analysis.chunk",
            TaskKind::AnalysisAggregate => "analysis.aggregate",
            TaskKind::MlRetrain => "ml.retrain",
        }
    }

    pub fn default_queue(&self) -> QueueName {
        match self {
            TaskKind::PdfValidate | TaskKind::PdfChunk => QueueName::Pdf,
            TaskKind::AnalysisChunk | TaskKind::AnalysisAggregate => QueueName::Analysis,
            TaskKind::MlRetrain => QueueName::Ml,
        }
    }
}

/// Retry policy carried by each work item. Backoff doubles per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff_base_secs: 60 }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt (1-based) re-enters its queue.
    pub fn backoff_secs(&self, attempt: u32) -> u64 {
        self.backoff_base_secs
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(10))
    }
}

/// A typed work item. Acknowledgement is late: the broker only removes a
/// leased task after the worker reports success; a lost worker lets the
/// visibility timeout hand the task back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: Uuid,
    pub queue: QueueName,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub retry: RetryPolicy,
    pub priority: u8,
    pub attempt: u32,
    pub soft_time_limit_secs: u64,
    pub hard_time_limit_secs: u64,
    pub created_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(kind: TaskKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: kind.default_queue(),
            kind,
            payload,
            retry: RetryPolicy::default(),
            priority: 0,
            attempt: 0,
            soft_time_limit_secs: 300,
            hard_time_limit_secs: 360,
            created_at: Utc::now(),
        }
    }

    pub fn with_queue(mut self, queue: QueueName) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Per-task override on top of queue defaults. The hard limit is also
    /// the visibility timeout of the lease.
    pub fn with_time_limits(mut self, soft_secs: u64, hard_secs: u64) -> Self {
        self.soft_time_limit_secs = soft_secs;
        self.hard_time_limit_secs = hard_secs.max(soft_secs);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The job this task belongs to, when the payload names one.
    pub fn job_id(&self) -> Option<Uuid> {
        self.payload
            .get("jobId")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_kind_round_trip() {
        let kind = TaskKind::PdfChunk;
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, "\"pdf.chunk\"");
        let back: TaskKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let retry = RetryPolicy { max_attempts: 5, backoff_base_secs: 60 };
        assert_eq!(retry.backoff_secs(1), 60);
        assert_eq!(retry.backoff_secs(2), 120);
        assert_eq!(retry.backoff_secs(3), 240);
    }

    #[test]
    fn test_priority_queue_drains_first() {
        assert_eq!(QueueName::DRAIN_ORDER[0], QueueName::Priority);
    }

    #[test]
    fn test_envelope_job_id_extraction() {
        let job_id = Uuid::new_v4();
        let task = TaskEnvelope::new(
            TaskKind::PdfValidate,
            serde_json::json!({ "jobId": job_id.to_string() }),
        );
        assert_eq!(task.job_id(), Some(job_id));
        assert_eq!(task.queue, QueueName::Pdf);
    }

    #[test]
    fn test_hard_limit_never_below_soft_limit() {
        let task = TaskEnvelope::new(TaskKind::PdfChunk, serde_json::json!({}))
            .with_time_limits(600, 300);
        assert_eq!(task.hard_time_limit_secs, 600);
    }
}
