use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use ndarray::{Array1, Array2};
use serde_json::json;
use uuid::Uuid;

use super::feedback_log::FeedbackLog;
use super::pipeline_service::pages_from_chunks;
use crate::analysis::{self, PageMap};
use crate::config::settings::LearningConfig;
use crate::db::{
    ChunkRepository, FeedbackRepository, JobRepository, PredictionRepository,
};
use crate::error::{AppError, AppResult};
use crate::ml::{
    BOOSTING_MODEL, FOREST_MODEL, FeatureInput, FeatureStrategy, LeadModel, ModelRegistry,
    StandardFeatures,
};
use crate::ml::boosting::GradientBoostingRegressor;
use crate::ml::features::FEATURE_COUNT;
use crate::ml::forest::{RandomForestClassifier, score_to_class};
use crate::models::{FeedbackQuestion, ModelMetrics, PredictionRow};
use crate::queue::{TaskBroker, TaskEnvelope, TaskKind};
use crate::storage::ObjectStorage;

/// Outcome of one retraining cycle.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrainOutcome {
    pub samples: usize,
    pub feedback_samples: usize,
    pub forest_version: i64,
    pub boosting_version: i64,
}

/// Active-learning loop: finds uncertain predictions and asks for human
/// feedback, converts feedback to labels, and retrains the ensemble when
/// enough signal accumulated.
pub struct LearningService {
    jobs: JobRepository,
    chunks: ChunkRepository,
    predictions: PredictionRepository,
    feedback: FeedbackRepository,
    registry: Arc<ModelRegistry>,
    storage: Arc<dyn ObjectStorage>,
    broker: TaskBroker,
    feedback_log: FeedbackLog,
    config: LearningConfig,
    ml_time_limit_secs: u64,
}

impl LearningService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: JobRepository,
        chunks: ChunkRepository,
        predictions: PredictionRepository,
        feedback: FeedbackRepository,
        registry: Arc<ModelRegistry>,
        storage: Arc<dyn ObjectStorage>,
        broker: TaskBroker,
        feedback_log: FeedbackLog,
        config: LearningConfig,
        ml_time_limit_secs: u64,
    ) -> Self {
        Self {
            jobs,
            chunks,
            predictions,
            feedback,
            registry,
            storage,
            broker,
            feedback_log,
            config,
            ml_time_limit_secs,
        }
    }

    /// Hands training to the ml queue so the executor pool does the CPU
    /// work; the scheduler threads only decide.
    async fn enqueue_retraining(&self, trigger: &str) -> AppResult<()> {
        let task = TaskEnvelope::new(
            TaskKind::MlRetrain,
            serde_json::json!({ "trigger": trigger }),
        )
        .with_time_limits(self.ml_time_limit_secs, self.ml_time_limit_secs + 120);
        self.broker.enqueue(&task).await
    }

    /// Uncertainty sweep (6-hourly): selects predictions whose confidence
    /// is below the threshold or whose ensemble members disagree, and
    /// writes a feedback request for each.
    pub async fn uncertainty_sweep(&self) -> AppResult<usize> {
        let mut candidates: HashMap<Uuid, (PredictionRow, String)> = HashMap::new();

        for row in self
            .predictions
            .list_uncertain(self.config.uncertainty_threshold, 50)
            .await?
        {
            let reason = uncertainty_reason(&row, member_disagreement(&row), &self.config);
            candidates.insert(row.job_id, (row, reason));
        }

        let week_ago = Utc::now() - Duration::days(7);
        for row in self.predictions.list_recent(week_ago).await? {
            let disagreement = member_disagreement(&row);
            if disagreement > self.config.disagreement_threshold
                && !candidates.contains_key(&row.job_id)
            {
                let reason = uncertainty_reason(&row, disagreement, &self.config);
                candidates.insert(row.job_id, (row, reason));
            }
        }

        let mut created = 0;
        for (job_id, (prediction, reason)) in candidates {
            let Some(job) = self.jobs.get_by_id(&job_id).await? else { continue };

            let summary = json!({
                "filename": job.filename,
                "fileSizeMb": (job.file_size as f64) / (1024.0 * 1024.0),
                "pageCount": job.page_count,
            });
            let current = json!({
                "leadScore": prediction.lead_score,
                "confidence": prediction.confidence,
                "classification": prediction.classification,
            });
            let questions = feedback_questions(prediction.lead_score);

            self.feedback
                .insert_request(
                    &job_id,
                    summary,
                    current,
                    serde_json::to_value(&questions)?,
                    &reason,
                )
                .await?;
            created += 1;
        }

        log::info!("Uncertainty sweep created {} feedback requests", created);
        Ok(created)
    }

    /// Records user feedback: persists the record, appends it to the
    /// durable JSONL log and settles the pending request.
    pub async fn record_feedback(
        &self,
        job_id: &Uuid,
        answers: serde_json::Value,
        metadata: serde_json::Value,
    ) -> AppResult<()> {
        self.feedback
            .insert_record(job_id, answers.clone(), metadata.clone())
            .await?;
        self.feedback_log
            .append(&json!({
                "jobId": job_id.to_string(),
                "userFeedback": answers,
                "metadata": metadata,
                "timestamp": Utc::now(),
                "processed": false,
            }))
            .await?;
        self.feedback.mark_request_answered(job_id).await?;
        Ok(())
    }

    /// Feedback batch (12-hourly): queues a retraining run once the
    /// pending feedback count reaches the configured minimum.
    pub async fn feedback_batch(&self) -> AppResult<bool> {
        let pending = self.feedback.list_unprocessed().await?;
        if pending.len() < self.config.min_feedback_for_retrain {
            log::info!(
                "Feedback batch skipped: {} pending (minimum {})",
                pending.len(),
                self.config.min_feedback_for_retrain
            );
            return Ok(false);
        }

        log::info!("Feedback batch: {} pending records, queueing retraining", pending.len());
        self.enqueue_retraining("feedback-batch").await?;
        Ok(true)
    }

    /// Daily auto-retraining: per model, retrain when enough new samples
    /// arrived, the estimated performance dropped below the floor, or the
    /// model went too long without training. One condition suffices.
    pub async fn auto_retraining_check(&self) -> AppResult<bool> {
        let mut reasons = Vec::new();

        for name in [FOREST_MODEL, BOOSTING_MODEL] {
            let last_trained = self
                .registry
                .latest(name)
                .map(|a| a.trained_at)
                .unwrap_or_else(|| Utc::now() - Duration::days(365));

            let new_samples = self.jobs.count_completed_since(last_trained).await?;
            if new_samples >= self.config.min_new_samples {
                reasons.push(format!("{}: {} new samples", name, new_samples));
            }

            let performance = self.estimated_performance().await?;
            if performance < self.config.performance_floor {
                reasons.push(format!("{}: estimated performance {:.2}", name, performance));
            }

            let days = (Utc::now() - last_trained).num_days();
            if days > self.config.max_days_without_training {
                reasons.push(format!("{}: {} days since training", name, days));
            }
        }

        if reasons.is_empty() {
            log::info!("Auto-retraining not needed");
            return Ok(false);
        }

        log::info!("Auto-retraining triggered: {}", reasons.join("; "));
        self.enqueue_retraining("auto-retraining").await?;
        Ok(true)
    }

    /// Mean confidence of the last 7 days of predictions. A proxy, not a
    /// true performance measure: without ground truth the confidence of
    /// recent predictions is the only available signal.
    pub async fn estimated_performance(&self) -> AppResult<f64> {
        let week_ago = Utc::now() - Duration::days(7);
        let recent = self.predictions.list_recent(week_ago).await?;
        if recent.is_empty() {
            return Ok(0.5);
        }
        Ok(recent.iter().map(|p| p.confidence).sum::<f64>() / recent.len() as f64)
    }

    /// Builds the dataset (feedback-weighted), fits both members off the
    /// async runtime, registers the new versions, then archives the
    /// feedback that went into the labels.
    pub async fn retrain(&self) -> AppResult<RetrainOutcome> {
        let pending = self.feedback.list_unprocessed().await?;
        let mut feedback_labels: HashMap<Uuid, f64> = HashMap::new();
        for record in &pending {
            feedback_labels.insert(record.job_id, score_from_answers(&record.answers));
        }
        let jobs = self.jobs.list_completed(1000).await?;
        if jobs.len() < 5 {
            return Err(AppError::Processing(format!(
                "not enough completed jobs to train on ({})",
                jobs.len()
            )));
        }

        let mut rows: Vec<[f64; FEATURE_COUNT]> = Vec::new();
        let mut scores: Vec<f64> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();
        let mut feedback_samples = 0;

        for job in &jobs {
            let chunks = self.chunks.list_for_job(&job.id).await?;
            if chunks.is_empty() {
                continue;
            }
            let pages = pages_from_chunks(&chunks);
            let map = PageMap::new(&pages);
            let entities = analysis::extract_entities(&map);
            let features = StandardFeatures
                .extract(&FeatureInput { text: &map.full_text, entities: &entities });
            rows.push(features.to_array());

            // Human feedback labels carry double weight over the model's
            // own predictions.
            match feedback_labels.get(&job.id) {
                Some(label) => {
                    scores.push(label * 100.0);
                    weights.push(2.0);
                    feedback_samples += 1;
                }
                None => {
                    let score = self
                        .predictions
                        .latest_for_job(&job.id)
                        .await?
                        .map(|p| p.lead_score)
                        .unwrap_or(50.0);
                    scores.push(score);
                    weights.push(1.0);
                }
            }
        }

        let n = rows.len();
        if n < 5 {
            return Err(AppError::Processing(format!(
                "not enough feature rows to train on ({})",
                n
            )));
        }

        // Training is CPU-bound; run it on the blocking pool so the
        // worker's async executor stays responsive.
        let (forest, boosting, accuracy, rmse) = tokio::task::spawn_blocking(move || {
            let x = Array2::from_shape_fn((n, FEATURE_COUNT), |(i, j)| rows[i][j]);
            let y_scores = Array1::from_vec(scores.clone());
            let y_classes = Array1::from_shape_fn(n, |i| score_to_class(scores[i]));
            let w = Array1::from_vec(weights);

            // 80/20 split for evaluation metrics; the registered model is
            // fit on the full set.
            let split = (n * 4) / 5;
            let holdout = (n - split).max(1);

            let mut forest = RandomForestClassifier::new();
            forest.fit(x.view(), y_classes.view(), w.view());
            let mut correct = 0usize;
            for i in split..n {
                let probs = forest.predict_proba(x.row(i));
                let predicted = probs
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(c, _)| c as f64)
                    .unwrap_or(1.0);
                if predicted == y_classes[i] {
                    correct += 1;
                }
            }
            let accuracy = correct as f64 / holdout as f64;

            let mut boosting = GradientBoostingRegressor::new();
            boosting.fit(x.view(), y_scores.view(), w.view());
            let mut squared_error = 0.0;
            for i in split..n {
                let predicted = boosting.predict(x.row(i)).clamp(0.0, 100.0);
                squared_error += (predicted - y_scores[i]).powi(2);
            }
            let rmse = (squared_error / holdout as f64).sqrt();

            (forest, boosting, accuracy, rmse)
        })
        .await
        .map_err(|e| AppError::Internal(format!("training task panicked: {}", e)))?;

        let forest_artifact = self
            .registry
            .register(
                FOREST_MODEL,
                LeadModel::Forest(forest),
                ModelMetrics { accuracy, ..Default::default() },
                n as i64,
            )
            .await?;
        let boosting_artifact = self
            .registry
            .register(
                BOOSTING_MODEL,
                LeadModel::Boosting(boosting),
                ModelMetrics { rmse, ..Default::default() },
                n as i64,
            )
            .await?;

        // The consumed feedback is archived only after both registrations
        // landed.
        let ids: Vec<Uuid> = pending.iter().map(|r| r.id).collect();
        self.feedback.mark_processed(&ids).await?;
        self.feedback_log.archive(self.storage.as_ref()).await?;

        log::info!(
            "Retraining complete: {} samples ({} with feedback), accuracy {:.3}, rmse {:.2}",
            n,
            feedback_samples,
            accuracy,
            rmse
        );
        Ok(RetrainOutcome {
            samples: n,
            feedback_samples,
            forest_version: forest_artifact.version,
            boosting_version: boosting_artifact.version,
        })
    }
}

/// Standard deviation of the member scores, on the [0, 1] scale.
fn member_disagreement(row: &PredictionRow) -> f64 {
    let scores: Vec<f64> = row.member_scores().iter().map(|s| s / 100.0).collect();
    if scores.len() < 2 {
        return 0.0;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let variance =
        scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
    variance.sqrt()
}

fn uncertainty_reason(row: &PredictionRow, disagreement: f64, config: &LearningConfig) -> String {
    let mut reasons = Vec::new();
    if row.confidence < 0.2 {
        reasons.push("confiança muito baixa".to_string());
    } else if row.confidence < config.uncertainty_threshold {
        reasons.push("confiança baixa".to_string());
    }
    if disagreement > config.disagreement_threshold {
        reasons.push("modelos discordam".to_string());
    }
    if row.lead_score > 40.0 && row.lead_score < 60.0 {
        reasons.push("score próximo da fronteira".to_string());
    }
    if reasons.is_empty() {
        "incerteza geral".to_string()
    } else {
        reasons.join("; ")
    }
}

/// The fixed questionnaire, plus a score-validation question when the
/// prediction sits at either extreme.
pub fn feedback_questions(lead_score: f64) -> Vec<FeedbackQuestion> {
    let mut questions = vec![
        FeedbackQuestion {
            id: "overall_quality".to_string(),
            kind: "rating".to_string(),
            question: "De 1 a 5, qual a qualidade deste lead?".to_string(),
            options: vec![
                "1 - Péssimo".to_string(),
                "2 - Ruim".to_string(),
                "3 - Médio".to_string(),
                "4 - Bom".to_string(),
                "5 - Excelente".to_string(),
            ],
        },
        FeedbackQuestion {
            id: "would_invest".to_string(),
            kind: "boolean".to_string(),
            question: "Você investiria neste leilão?".to_string(),
            options: vec!["Sim".to_string(), "Não".to_string()],
        },
        FeedbackQuestion {
            id: "main_issue".to_string(),
            kind: "multiple_choice".to_string(),
            question: "Principal problema/oportunidade identificado:".to_string(),
            options: vec![
                "Preço muito alto".to_string(),
                "Documentação incompleta".to_string(),
                "Localização ruim".to_string(),
                "Riscos legais".to_string(),
                "Boa oportunidade".to_string(),
                "Preço atrativo".to_string(),
                "Localização excelente".to_string(),
                "Documentação completa".to_string(),
            ],
        },
    ];

    if lead_score > 70.0 {
        questions.push(FeedbackQuestion {
            id: "high_score_validation".to_string(),
            kind: "boolean".to_string(),
            question: format!("O modelo deu score alto ({:.0}). Você concorda?", lead_score),
            options: vec!["Concordo".to_string(), "Discordo".to_string()],
        });
    } else if lead_score < 30.0 {
        questions.push(FeedbackQuestion {
            id: "low_score_validation".to_string(),
            kind: "boolean".to_string(),
            question: format!("O modelo deu score baixo ({:.0}). Você concorda?", lead_score),
            options: vec!["Concordo".to_string(), "Discordo".to_string()],
        });
    }
    questions
}

const POSITIVE_ISSUES: &[&str] = &[
    "Boa oportunidade",
    "Preço atrativo",
    "Localização excelente",
    "Documentação completa",
];
const NEGATIVE_ISSUES: &[&str] = &[
    "Preço muito alto",
    "Documentação incompleta",
    "Localização ruim",
    "Riscos legais",
];

/// Converts questionnaire answers to a label in [0, 1]: each answered
/// component contributes a sub-score and the label is their mean.
pub fn score_from_answers(answers: &serde_json::Value) -> f64 {
    let mut components = Vec::new();

    if let Some(rating) = answers.get("overall_quality").and_then(|v| v.as_str()) {
        if let Some(value) = rating
            .split(" - ")
            .next()
            .and_then(|n| n.trim().parse::<f64>().ok())
        {
            components.push((value - 1.0) / 4.0);
        }
    }

    if let Some(invest) = answers.get("would_invest").and_then(|v| v.as_str()) {
        components.push(if invest == "Sim" { 1.0 } else { 0.0 });
    }

    if let Some(issue) = answers.get("main_issue").and_then(|v| v.as_str()) {
        if POSITIVE_ISSUES.contains(&issue) {
            components.push(0.8);
        } else if NEGATIVE_ISSUES.contains(&issue) {
            components.push(0.2);
        }
    }

    if let Some(validation) = answers.get("high_score_validation").and_then(|v| v.as_str()) {
        components.push(if validation == "Concordo" { 0.9 } else { 0.3 });
    }
    if let Some(validation) = answers.get("low_score_validation").and_then(|v| v.as_str()) {
        components.push(if validation == "Concordo" { 0.1 } else { 0.7 });
    }

    if components.is_empty() {
        return 0.5;
    }
    let score = components.iter().sum::<f64>() / components.len() as f64;
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_from_positive_answers() {
        let answers = json!({
            "overall_quality": "5 - Excelente",
            "would_invest": "Sim",
            "main_issue": "Boa oportunidade",
        });
        let score = score_from_answers(&answers);
        // (1.0 + 1.0 + 0.8) / 3
        assert!((score - 0.9333333333333332).abs() < 1e-9);
    }

    #[test]
    fn test_score_from_negative_answers() {
        let answers = json!({
            "overall_quality": "1 - Péssimo",
            "would_invest": "Não",
            "main_issue": "Riscos legais",
        });
        let score = score_from_answers(&answers);
        // (0.0 + 0.0 + 0.2) / 3
        assert!((score - 0.06666666666666667).abs() < 1e-9);
    }

    #[test]
    fn test_score_validation_components() {
        let agree_high = json!({ "high_score_validation": "Concordo" });
        assert_eq!(score_from_answers(&agree_high), 0.9);

        let disagree_low = json!({ "low_score_validation": "Discordo" });
        assert_eq!(score_from_answers(&disagree_low), 0.7);
    }

    #[test]
    fn test_empty_answers_are_neutral() {
        assert_eq!(score_from_answers(&json!({})), 0.5);
    }

    #[test]
    fn test_questionnaire_adds_validation_at_extremes() {
        let high = feedback_questions(85.0);
        assert!(high.iter().any(|q| q.id == "high_score_validation"));
        assert_eq!(high.len(), 4);

        let low = feedback_questions(15.0);
        assert!(low.iter().any(|q| q.id == "low_score_validation"));

        let middle = feedback_questions(50.0);
        assert_eq!(middle.len(), 3);
    }

    #[test]
    fn test_member_disagreement_std_dev() {
        let row = PredictionRow {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            model_version: "rf-1+gb-1".to_string(),
            lead_score: 50.0,
            confidence: 0.6,
            classification: "medium".to_string(),
            probabilities: json!({}),
            feature_importance: json!({}),
            members: json!([
                { "modelName": "random_forest_classifier", "leadScore": 80.0, "confidence": 0.8,
                  "classification": "high",
                  "probabilities": { "low": 0.1, "medium": 0.1, "high": 0.8 },
                  "featureImportance": {} },
                { "modelName": "gradient_boosting_regressor", "leadScore": 20.0, "confidence": 0.8,
                  "classification": "low",
                  "probabilities": { "low": 0.75, "medium": 0.2, "high": 0.05 },
                  "featureImportance": {} }
            ]),
            inference_ms: 5,
            created_at: Utc::now(),
        };
        // Scores 0.8 and 0.2: mean 0.5, std dev 0.3.
        assert!((member_disagreement(&row) - 0.3).abs() < 1e-9);
    }
}
