pub mod analysis;
pub mod chunk;
pub mod dashboard;
pub mod feedback;
pub mod job;
pub mod model_artifact;
pub mod prediction;

pub use analysis::{
    AnalysisPoint, AnalysisPointRow, Entity, PointCategory, PointPriority, PointStatus,
    TextAnalysis,
};
pub use chunk::{DocumentChunk, ImageMeta, NewChunk};
pub use dashboard::{DashboardSnapshot, DashboardStats};
pub use feedback::{FeedbackQuestion, FeedbackRecord, FeedbackRequest};
pub use job::{CreateJobRequest, Job, JobConfig, JobStatus};
pub use model_artifact::{ModelArtifactRow, ModelMetrics};
pub use prediction::{
    Classification, ClassProbabilities, MemberPrediction, Prediction, PredictionRow,
};
