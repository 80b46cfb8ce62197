pub mod connection;
pub mod pool_ext;
pub mod repositories;

pub use repositories::{
    AnalysisRepository, ChunkRepository, DashboardRepository, FeedbackRepository, JobRepository,
    ModelArtifactRepository, PredictionRepository, TaskAuditRepository,
};
