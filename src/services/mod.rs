pub mod dashboard_service;
pub mod feedback_log;
pub mod learning_service;
pub mod pipeline_service;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use dashboard_service::DashboardService;
pub use feedback_log::FeedbackLog;
pub use learning_service::LearningService;
pub use pipeline_service::{JobProgress, PipelineService};

use crate::error::AppResult;
use crate::queue::{TaskEnvelope, TaskHandler, TaskKind};

/// Routes leased work items to their owning service.
pub struct TaskRouter {
    pub pipeline: Arc<PipelineService>,
    pub learning: Arc<LearningService>,
}

#[async_trait::async_trait]
impl TaskHandler for TaskRouter {
    async fn handle(&self, task: &TaskEnvelope, token: CancellationToken) -> AppResult<()> {
        match task.kind {
            TaskKind::MlRetrain => self.learning.retrain().await.map(|outcome| {
                log::info!(
                    "Queued retraining finished: {} samples, forest v{}, boosting v{}",
                    outcome.samples,
                    outcome.forest_version,
                    outcome.boosting_version
                );
            }),
            _ => self.pipeline.handle(task, token).await,
        }
    }
}
