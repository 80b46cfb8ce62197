use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::boosting::GradientBoostingRegressor;
use super::features::FEATURE_COUNT;
use super::forest::RandomForestClassifier;
use crate::db::ModelArtifactRepository;
use crate::error::{AppError, AppResult};
use crate::models::{ModelArtifactRow, ModelMetrics};
use crate::storage::{ObjectStorage, PutBody};

pub const FOREST_MODEL: &str = "random_forest_classifier";
pub const BOOSTING_MODEL: &str = "gradient_boosting_regressor";

/// A trained ensemble member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LeadModel {
    Forest(RandomForestClassifier),
    Boosting(GradientBoostingRegressor),
}

impl LeadModel {
    pub fn is_trained(&self) -> bool {
        match self {
            LeadModel::Forest(m) => m.is_trained(),
            LeadModel::Boosting(m) => m.is_trained(),
        }
    }
}

/// One registered model version. Immutable after registration; readers
/// share the Arc and are unaffected by later registrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    pub version: i64,
    pub model: LeadModel,
    pub metrics: ModelMetrics,
    pub training_samples: i64,
    pub trained_at: chrono::DateTime<Utc>,
}

fn model_key(name: &str, version: i64) -> String {
    format!("models/{}/{}/model", name, version)
}

fn metrics_key(name: &str, version: i64) -> String {
    format!("models/{}/{}/metrics", name, version)
}

fn metadata_key(name: &str, version: i64) -> String {
    format!("models/{}/{}/metadata", name, version)
}

/// Process-wide versioned model store. The one sanctioned process-global:
/// artifacts are immutable once registered, so sharing is safe.
pub struct ModelRegistry {
    storage: Arc<dyn ObjectStorage>,
    repository: ModelArtifactRepository,
    /// name -> versions, newest first.
    models: DashMap<String, Vec<Arc<ModelArtifact>>>,
}

impl ModelRegistry {
    pub fn new(storage: Arc<dyn ObjectStorage>, repository: ModelArtifactRepository) -> Self {
        Self {
            storage,
            repository,
            models: DashMap::new(),
        }
    }

    /// Loads the latest persisted version of each known model into memory.
    pub async fn warm_up(&self) -> AppResult<()> {
        for name in [FOREST_MODEL, BOOSTING_MODEL] {
            match self.repository.latest(name).await? {
                Some(row) => match self.load_version(name, row.version).await {
                    Ok(artifact) => {
                        self.publish(artifact);
                        log::info!("Loaded model {} version {}", name, row.version);
                    }
                    Err(e) => {
                        log::warn!("Could not load model {} version {}: {}", name, row.version, e)
                    }
                },
                None => log::info!("No registered versions of {}", name),
            }
        }
        Ok(())
    }

    /// Registers a new version: artifact bytes, metrics and metadata all
    /// land in storage before the database row and in-memory publish, so
    /// a failure partway leaves no addressable version behind.
    pub async fn register(
        &self,
        name: &str,
        model: LeadModel,
        metrics: ModelMetrics,
        training_samples: i64,
    ) -> AppResult<Arc<ModelArtifact>> {
        let version = Utc::now().timestamp_millis();
        let artifact = ModelArtifact {
            name: name.to_string(),
            version,
            model,
            metrics: metrics.clone(),
            training_samples,
            trained_at: Utc::now(),
        };

        let model_bytes = serde_json::to_vec(&artifact.model)?;
        let size_bytes = model_bytes.len() as i64;
        self.storage
            .put(
                &model_key(name, version),
                PutBody::Bytes(Bytes::from(model_bytes)),
                "application/json",
                Default::default(),
            )
            .await?;
        self.storage
            .put(
                &metrics_key(name, version),
                PutBody::Bytes(Bytes::from(serde_json::to_vec(&metrics)?)),
                "application/json",
                Default::default(),
            )
            .await?;

        // Metadata lands last and acts as the commit marker for loaders.
        let metadata = serde_json::json!({
            "modelName": name,
            "version": version,
            "trainingSamples": training_samples,
            "featureCount": FEATURE_COUNT,
            "trainedAt": artifact.trained_at,
        });
        self.storage
            .put(
                &metadata_key(name, version),
                PutBody::Bytes(Bytes::from(serde_json::to_vec(&metadata)?)),
                "application/json",
                Default::default(),
            )
            .await?;

        let trend = self.performance_trend(name, &metrics);
        self.repository
            .insert(&ModelArtifactRow {
                model_name: name.to_string(),
                version,
                metrics: serde_json::to_value(&metrics)?,
                training_samples,
                feature_count: FEATURE_COUNT as i32,
                size_bytes,
                performance_trend: trend,
                trained_at: artifact.trained_at,
            })
            .await?;

        let artifact = Arc::new(artifact);
        self.publish(artifact.clone());
        log::info!(
            "Registered model {} version {} ({} samples)",
            name,
            version,
            training_samples
        );
        Ok(artifact)
    }

    #[cfg(test)]
    pub fn insert_for_tests(&self, artifact: ModelArtifact) {
        self.publish(Arc::new(artifact));
    }

    fn publish(&self, artifact: Arc<ModelArtifact>) {
        let mut entry = self.models.entry(artifact.name.clone()).or_default();
        entry.insert(0, artifact);
        entry.sort_by(|a, b| b.version.cmp(&a.version));
    }

    /// Latest in-memory version of a model, if any.
    pub fn latest(&self, name: &str) -> Option<Arc<ModelArtifact>> {
        self.models.get(name).and_then(|versions| versions.first().cloned())
    }

    pub fn get(&self, name: &str, version: i64) -> Option<Arc<ModelArtifact>> {
        self.models
            .get(name)
            .and_then(|versions| versions.iter().find(|a| a.version == version).cloned())
    }

    pub async fn get_metrics(&self, name: &str, version: Option<i64>) -> AppResult<ModelMetrics> {
        match version {
            Some(version) => self
                .get(name, version)
                .map(|a| a.metrics.clone())
                .ok_or_else(|| AppError::NotFound(format!("model {} version {}", name, version))),
            None => self
                .latest(name)
                .map(|a| a.metrics.clone())
                .ok_or_else(|| AppError::NotFound(format!("model {}", name))),
        }
    }

    /// All registered versions per model, newest first.
    pub async fn list(&self) -> AppResult<Vec<ModelArtifactRow>> {
        self.repository.list_all().await
    }

    /// Older versions stay addressable: fetch from storage on demand.
    pub async fn load_version(&self, name: &str, version: i64) -> AppResult<Arc<ModelArtifact>> {
        if let Some(artifact) = self.get(name, version) {
            return Ok(artifact);
        }

        // Metadata is the commit marker; absent means the version never
        // fully registered.
        let _ = self.storage.get_bytes(&metadata_key(name, version)).await?;
        let model_bytes = self.storage.get_bytes(&model_key(name, version)).await?;
        let model: LeadModel = serde_json::from_slice(&model_bytes)?;
        let metrics_bytes = self.storage.get_bytes(&metrics_key(name, version)).await?;
        let metrics: ModelMetrics = serde_json::from_slice(&metrics_bytes)?;

        let row = self.repository.latest(name).await?;
        let training_samples = row.map(|r| r.training_samples).unwrap_or(0);

        Ok(Arc::new(ModelArtifact {
            name: name.to_string(),
            version,
            model,
            metrics,
            training_samples,
            trained_at: Utc::now(),
        }))
    }

    fn performance_trend(&self, name: &str, new_metrics: &ModelMetrics) -> String {
        let Some(previous) = self.latest(name) else {
            return "initial".to_string();
        };
        let new_signal = new_metrics.accuracy.max(new_metrics.auc);
        let old_signal = previous.metrics.accuracy.max(previous.metrics.auc);
        if new_signal > old_signal + 0.01 {
            "improving".to_string()
        } else if new_signal + 0.01 < old_signal {
            "degrading".to_string()
        } else {
            "stable".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::forest::RandomForestClassifier;

    fn registry() -> ModelRegistry {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(crate::storage::local::LocalStorage::new(
            dir.path().to_str().unwrap(),
        )
        .unwrap());
        std::mem::forget(dir);
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        ModelRegistry::new(storage, ModelArtifactRepository::new(pool))
    }

    fn artifact(version: i64) -> ModelArtifact {
        ModelArtifact {
            name: FOREST_MODEL.to_string(),
            version,
            model: LeadModel::Forest(RandomForestClassifier::new()),
            metrics: ModelMetrics::default(),
            training_samples: 10,
            trained_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_latest_returns_newest_version() {
        let registry = registry();
        registry.insert_for_tests(artifact(1));
        registry.insert_for_tests(artifact(3));
        registry.insert_for_tests(artifact(2));

        let latest = registry.latest(FOREST_MODEL).unwrap();
        assert_eq!(latest.version, 3);
        assert!(registry.get(FOREST_MODEL, 1).is_some());
        assert!(registry.get(FOREST_MODEL, 99).is_none());
    }

    #[tokio::test]
    async fn test_reader_keeps_its_artifact_across_registrations() {
        let registry = registry();
        registry.insert_for_tests(artifact(1));
        let held = registry.latest(FOREST_MODEL).unwrap();

        registry.insert_for_tests(artifact(2));
        // The old handle is unaffected; new readers see the new version.
        assert_eq!(held.version, 1);
        assert_eq!(registry.latest(FOREST_MODEL).unwrap().version, 2);
    }

    #[test]
    fn test_model_storage_key_layout() {
        assert_eq!(model_key("rf", 7), "models/rf/7/model");
        assert_eq!(metrics_key("rf", 7), "models/rf/7/metrics");
        assert_eq!(metadata_key("rf", 7), "models/rf/7/metadata");
    }
}
