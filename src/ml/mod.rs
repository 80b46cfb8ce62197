pub mod boosting;
pub mod features;
pub mod forest;
pub mod registry;
pub mod scoring;
pub mod tree;

pub use features::{
    EnhancedAssessment, EnhancedFeatures, FEATURE_COUNT, FeatureInput, FeatureStrategy,
    FeatureVector, StandardFeatures,
};
pub use registry::{BOOSTING_MODEL, FOREST_MODEL, LeadModel, ModelArtifact, ModelRegistry};
pub use scoring::ScoringEngine;
