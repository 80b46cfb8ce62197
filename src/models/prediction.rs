use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lead classification derived from the ensemble score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Low,
    Medium,
    High,
}

impl Classification {
    /// Threshold table: >= 75 high, >= 50 medium, else low.
    pub fn from_score(score: f64) -> Self {
        if score >= 75.0 {
            Classification::High
        } else if score >= 50.0 {
            Classification::Medium
        } else {
            Classification::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Low => "low",
            Classification::Medium => "medium",
            Classification::High => "high",
        }
    }
}

/// Probability mass over the three lead classes. Always sums to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl ClassProbabilities {
    pub fn uniform_dummy() -> Self {
        Self { low: 0.3, medium: 0.4, high: 0.3 }
    }

    pub fn sum(&self) -> f64 {
        self.low + self.medium + self.high
    }
}

/// Output of a single ensemble member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPrediction {
    pub model_name: String,
    pub lead_score: f64,
    pub confidence: f64,
    pub classification: Classification,
    pub probabilities: ClassProbabilities,
    pub feature_importance: std::collections::HashMap<String, f64>,
}

/// Combined ensemble output for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub lead_score: f64,
    pub confidence: f64,
    pub classification: Classification,
    pub probabilities: ClassProbabilities,
    pub feature_importance: std::collections::HashMap<String, f64>,
    pub members: Vec<MemberPrediction>,
    pub model_version: String,
    pub inference_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PredictionRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub model_version: String,
    pub lead_score: f64,
    pub confidence: f64,
    pub classification: String,
    pub probabilities: serde_json::Value,
    pub feature_importance: serde_json::Value,
    pub members: serde_json::Value,
    pub inference_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl PredictionRow {
    pub fn member_scores(&self) -> Vec<f64> {
        serde_json::from_value::<Vec<MemberPrediction>>(self.members.clone())
            .map(|ms| ms.iter().map(|m| m.lead_score).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(Classification::from_score(75.0), Classification::High);
        assert_eq!(Classification::from_score(74.9), Classification::Medium);
        assert_eq!(Classification::from_score(50.0), Classification::Medium);
        assert_eq!(Classification::from_score(49.9), Classification::Low);
        assert_eq!(Classification::from_score(0.0), Classification::Low);
        assert_eq!(Classification::from_score(100.0), Classification::High);
    }

    #[test]
    fn test_dummy_probabilities_sum_to_one() {
        let p = ClassProbabilities::uniform_dummy();
        assert!((p.sum() - 1.0).abs() < 1e-9);
    }
}
