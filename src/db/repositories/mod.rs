pub mod analysis_repository;
pub mod chunk_repository;
pub mod dashboard_repository;
pub mod feedback_repository;
pub mod job_repository;
pub mod model_artifact_repository;
pub mod prediction_repository;
pub mod task_audit_repository;

pub use analysis_repository::AnalysisRepository;
pub use chunk_repository::ChunkRepository;
pub use dashboard_repository::{DashboardAggregates, DashboardRepository};
pub use feedback_repository::FeedbackRepository;
pub use job_repository::JobRepository;
pub use model_artifact_repository::ModelArtifactRepository;
pub use prediction_repository::PredictionRepository;
pub use task_audit_repository::TaskAuditRepository;
