use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use ndarray::ArrayView1;

use super::features::{EnhancedAssessment, FeatureVector};
use super::registry::{BOOSTING_MODEL, FOREST_MODEL, LeadModel, ModelRegistry};
use crate::models::{ClassProbabilities, Classification, MemberPrediction, Prediction};

const FOREST_WEIGHT: f64 = 0.6;
const BOOSTING_WEIGHT: f64 = 0.4;

/// Combines the ensemble members into a calibrated lead score.
pub struct ScoringEngine {
    registry: Arc<ModelRegistry>,
}

impl ScoringEngine {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Scores a feature vector. With neither member trained the dummy
    /// prediction {score 50, confidence 0.5, medium} is returned
    /// unchanged. When an enhanced assessment is supplied, the final
    /// score is a confidence-weighted blend of the rubric and the
    /// ensemble.
    pub fn score(
        &self,
        features: &FeatureVector,
        enhanced: Option<&EnhancedAssessment>,
    ) -> Prediction {
        let started = Instant::now();
        let row_values = features.to_array();
        let row = ArrayView1::from(&row_values);

        let mut members = Vec::new();
        let mut version_parts = Vec::new();

        if let Some(artifact) = self.registry.latest(FOREST_MODEL) {
            if let LeadModel::Forest(forest) = &artifact.model {
                if forest.is_trained() {
                    members.push((FOREST_WEIGHT, forest_member(forest, row)));
                    version_parts.push(format!("rf-{}", artifact.version));
                }
            }
        }
        if let Some(artifact) = self.registry.latest(BOOSTING_MODEL) {
            if let LeadModel::Boosting(boosting) = &artifact.model {
                if boosting.is_trained() {
                    members.push((BOOSTING_WEIGHT, boosting_member(boosting, row)));
                    version_parts.push(format!("gb-{}", artifact.version));
                }
            }
        }

        if members.is_empty() {
            return dummy_prediction(started.elapsed().as_millis() as u64);
        }

        let total_weight: f64 = members.iter().map(|(w, _)| w).sum();
        let mut score = 0.0;
        let mut confidence = 0.0;
        let mut probabilities = ClassProbabilities { low: 0.0, medium: 0.0, high: 0.0 };
        let mut feature_importance: HashMap<String, f64> = HashMap::new();

        for (weight, member) in &members {
            let weight = weight / total_weight;
            score += member.lead_score * weight;
            confidence += member.confidence * weight;
            probabilities.low += member.probabilities.low * weight;
            probabilities.medium += member.probabilities.medium * weight;
            probabilities.high += member.probabilities.high * weight;
            for (feature, importance) in &member.feature_importance {
                *feature_importance.entry(feature.clone()).or_insert(0.0) +=
                    importance * weight;
            }
        }

        // Enhanced mode blends the rubric score in, weighted by how
        // confident the extraction was.
        if let Some(assessment) = enhanced {
            let enhanced_weight = if assessment.extraction_confidence > 70.0 { 0.7 } else { 0.4 };
            score = assessment.adjusted_score * enhanced_weight + score * (1.0 - enhanced_weight);
        }
        let score = score.clamp(0.0, 100.0);

        Prediction {
            lead_score: score,
            confidence,
            classification: Classification::from_score(score),
            probabilities,
            feature_importance,
            members: members.into_iter().map(|(_, m)| m).collect(),
            model_version: version_parts.join("+"),
            inference_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn importance_map(importances: &[f64]) -> HashMap<String, f64> {
    FeatureVector::names()
        .iter()
        .zip(importances.iter())
        .filter(|(_, imp)| **imp > 0.0)
        .map(|(name, imp)| (name.to_string(), *imp))
        .collect()
}

/// Forest member: score is the expectation 20·P(low) + 60·P(med) +
/// 90·P(high); confidence is the winning-class probability.
fn forest_member(
    forest: &super::forest::RandomForestClassifier,
    row: ArrayView1<'_, f64>,
) -> MemberPrediction {
    let probs = forest.predict_proba(row);
    let score = 20.0 * probs[0] + 60.0 * probs[1] + 90.0 * probs[2];
    let confidence = probs.iter().cloned().fold(0.0, f64::max);

    MemberPrediction {
        model_name: FOREST_MODEL.to_string(),
        lead_score: score,
        confidence,
        classification: Classification::from_score(score),
        probabilities: ClassProbabilities { low: probs[0], medium: probs[1], high: probs[2] },
        feature_importance: importance_map(&forest.feature_importances()),
    }
}

/// Boosting member: raw regression clipped to [0, 100], class
/// distribution from the fixed piecewise table.
fn boosting_member(
    boosting: &super::boosting::GradientBoostingRegressor,
    row: ArrayView1<'_, f64>,
) -> MemberPrediction {
    let score = boosting.predict(row).clamp(0.0, 100.0);
    let probabilities = score_to_probabilities(score);
    let confidence = if score >= 80.0 {
        0.9
    } else if score >= 50.0 {
        0.7
    } else {
        0.8
    };

    MemberPrediction {
        model_name: BOOSTING_MODEL.to_string(),
        lead_score: score,
        confidence,
        classification: Classification::from_score(score),
        probabilities,
        feature_importance: importance_map(&boosting.feature_importances()),
    }
}

fn score_to_probabilities(score: f64) -> ClassProbabilities {
    if score >= 80.0 {
        ClassProbabilities { high: 0.8, medium: 0.15, low: 0.05 }
    } else if score >= 60.0 {
        ClassProbabilities { high: 0.4, medium: 0.5, low: 0.1 }
    } else if score >= 40.0 {
        ClassProbabilities { high: 0.1, medium: 0.6, low: 0.3 }
    } else {
        ClassProbabilities { high: 0.05, medium: 0.2, low: 0.75 }
    }
}

fn dummy_prediction(inference_ms: u64) -> Prediction {
    Prediction {
        lead_score: 50.0,
        confidence: 0.5,
        classification: Classification::Medium,
        probabilities: ClassProbabilities::uniform_dummy(),
        feature_importance: HashMap::new(),
        members: Vec::new(),
        model_version: "untrained".to_string(),
        inference_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ModelArtifactRepository;
    use crate::ml::boosting::GradientBoostingRegressor;
    use crate::ml::features::FEATURE_COUNT;
    use crate::ml::forest::RandomForestClassifier;
    use crate::models::ModelMetrics;
    use crate::storage::local::LocalStorage;
    use chrono::Utc;
    use ndarray::{Array1, Array2};

    fn empty_registry() -> Arc<ModelRegistry> {
        // Registry with no published models; storage and repository stay
        // untouched by in-memory reads.
        let dir = tempfile::tempdir().unwrap();
        let storage =
            Arc::new(LocalStorage::new(dir.path().to_str().unwrap()).unwrap());
        std::mem::forget(dir);
        let pool = sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://localhost/unused");
        let repository = ModelArtifactRepository::new(pool.unwrap());
        Arc::new(ModelRegistry::new(storage, repository))
    }

    fn trained_models() -> (RandomForestClassifier, GradientBoostingRegressor) {
        let n = 60;
        let x = Array2::from_shape_fn((n, FEATURE_COUNT), |(i, j)| {
            if j == 0 { (i / 20) as f64 * 10.0 } else { 0.0 }
        });
        let classes = Array1::from_shape_fn(n, |i| (i / 20) as f64);
        let scores = Array1::from_shape_fn(n, |i| (i / 20) as f64 * 40.0 + 10.0);
        let w = Array1::ones(n);

        let mut forest = RandomForestClassifier::new();
        forest.fit(x.view(), classes.view(), w.view());
        let mut boosting = GradientBoostingRegressor::new();
        boosting.fit(x.view(), scores.view(), w.view());
        (forest, boosting)
    }

    #[tokio::test]
    async fn test_dummy_prediction_when_untrained() {
        let engine = ScoringEngine::new(empty_registry());
        let prediction = engine.score(&FeatureVector::default(), None);

        assert_eq!(prediction.lead_score, 50.0);
        assert_eq!(prediction.confidence, 0.5);
        assert_eq!(prediction.classification, Classification::Medium);
        assert!(prediction.members.is_empty());
        assert_eq!(prediction.model_version, "untrained");
    }

    #[test]
    fn test_piecewise_probability_table() {
        assert_eq!(score_to_probabilities(85.0).high, 0.8);
        assert_eq!(score_to_probabilities(65.0).medium, 0.5);
        assert_eq!(score_to_probabilities(45.0).medium, 0.6);
        assert_eq!(score_to_probabilities(10.0).low, 0.75);
        for score in [85.0, 65.0, 45.0, 10.0] {
            assert!((score_to_probabilities(score).sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_forest_member_score_is_probability_expectation() {
        let (forest, _) = trained_models();
        let mut row = [0.0; FEATURE_COUNT];
        row[0] = 0.0;
        let member = forest_member(&forest, ArrayView1::from(&row));
        let expected = 20.0 * member.probabilities.low
            + 60.0 * member.probabilities.medium
            + 90.0 * member.probabilities.high;
        assert!((member.lead_score - expected).abs() < 1e-9);
    }

    fn registry_with(models: Vec<(&str, LeadModel)>) -> Arc<ModelRegistry> {
        let registry = empty_registry();
        for (name, model) in models {
            registry.insert_for_tests(crate::ml::registry::ModelArtifact {
                name: name.to_string(),
                version: 1,
                model,
                metrics: ModelMetrics::default(),
                training_samples: 60,
                trained_at: Utc::now(),
            });
        }
        registry
    }

    #[tokio::test]
    async fn test_ensemble_weights_both_members() {
        let (forest, boosting) = trained_models();
        let registry = registry_with(vec![
            (FOREST_MODEL, LeadModel::Forest(forest.clone())),
            (BOOSTING_MODEL, LeadModel::Boosting(boosting.clone())),
        ]);
        let engine = ScoringEngine::new(registry);

        let mut features = FeatureVector::default();
        features.text_length = 0.0;
        let prediction = engine.score(&features, None);

        let row = [0.0; FEATURE_COUNT];
        let f = forest_member(&forest, ArrayView1::from(&row));
        let b = boosting_member(&boosting, ArrayView1::from(&row));
        let expected_score = f.lead_score * 0.6 + b.lead_score * 0.4;

        assert!((prediction.lead_score - expected_score).abs() < 1e-9);
        assert_eq!(prediction.members.len(), 2);
        assert_eq!(
            prediction.classification,
            Classification::from_score(prediction.lead_score)
        );
        assert!((prediction.probabilities.sum() - 1.0).abs() < 1e-9);
        assert_eq!(prediction.model_version, "rf-1+gb-1");
    }

    #[tokio::test]
    async fn test_single_member_weight_renormalizes() {
        let (forest, _) = trained_models();
        let registry = registry_with(vec![(FOREST_MODEL, LeadModel::Forest(forest.clone()))]);
        let engine = ScoringEngine::new(registry);

        let prediction = engine.score(&FeatureVector::default(), None);
        let row = [0.0; FEATURE_COUNT];
        let f = forest_member(&forest, ArrayView1::from(&row));

        // With only the forest available its 0.6 weight renormalizes to 1.
        assert!((prediction.lead_score - f.lead_score).abs() < 1e-9);
        assert_eq!(prediction.members.len(), 1);
    }

    #[tokio::test]
    async fn test_enhanced_blend_weighting() {
        let (forest, boosting) = trained_models();
        let registry = registry_with(vec![
            (FOREST_MODEL, LeadModel::Forest(forest)),
            (BOOSTING_MODEL, LeadModel::Boosting(boosting)),
        ]);
        let engine = ScoringEngine::new(registry);

        let base = engine.score(&FeatureVector::default(), None);

        let confident = EnhancedAssessment {
            adjusted_score: 90.0,
            extraction_confidence: 80.0,
            financial_attractiveness: 30.0,
            legal_quality: 25.0,
            document_quality: 20.0,
            opportunity: 10.0,
            risk_mitigation: 5.0,
        };
        let blended = engine.score(&FeatureVector::default(), Some(&confident));
        let expected = 90.0 * 0.7 + base.lead_score * 0.3;
        assert!((blended.lead_score - expected).abs() < 1e-9);

        let hesitant = EnhancedAssessment { extraction_confidence: 40.0, ..confident };
        let blended = engine.score(&FeatureVector::default(), Some(&hesitant));
        let expected = 90.0 * 0.4 + base.lead_score * 0.6;
        assert!((blended.lead_score - expected).abs() < 1e-9);
    }
}
