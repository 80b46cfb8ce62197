use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Verdict tag attached to an analysis point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointStatus {
    #[serde(rename = "confirmado")]
    Confirmado,
    #[serde(rename = "alerta")]
    Alerta,
    #[serde(rename = "não_identificado")]
    NaoIdentificado,
}

impl PointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointStatus::Confirmado => "confirmado",
            PointStatus::Alerta => "alerta",
            PointStatus::NaoIdentificado => "não_identificado",
        }
    }
}

/// Category of an analysis point. The declaration order here is the
/// presentation order of points within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PointCategory {
    #[serde(rename = "geral")]
    Geral,
    #[serde(rename = "leilao")]
    Leilao,
    #[serde(rename = "investimento")]
    Investimento,
    #[serde(rename = "financeiro")]
    Financeiro,
    #[serde(rename = "prazo")]
    Prazo,
    #[serde(rename = "contato")]
    Contato,
}

impl PointCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointCategory::Geral => "geral",
            PointCategory::Leilao => "leilao",
            PointCategory::Investimento => "investimento",
            PointCategory::Financeiro => "financeiro",
            PointCategory::Prazo => "prazo",
            PointCategory::Contato => "contato",
        }
    }

    pub fn sort_rank(&self) -> i32 {
        *self as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointPriority {
    Low,
    Medium,
    High,
}

impl PointPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointPriority::Low => "low",
            PointPriority::Medium => "medium",
            PointPriority::High => "high",
        }
    }
}

/// A discrete finding surfaced to the user, anchored to a page when the
/// detection site is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPoint {
    pub id: String,
    pub title: String,
    pub comment: String,
    pub status: PointStatus,
    pub category: PointCategory,
    pub priority: PointPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_reference: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Byte offset of the first detection in the concatenated text, used
    /// only for deterministic ordering; not serialized to clients.
    #[serde(skip)]
    pub detection_offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisPointRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub point_id: String,
    pub title: String,
    pub comment: String,
    pub status: String,
    pub category: String,
    pub priority: String,
    pub page_reference: Option<i32>,
    pub raw_value: Option<String>,
    pub details: Option<serde_json::Value>,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

/// One per job, produced from the concatenated chunk texts. Immutable once
/// written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TextAnalysis {
    pub id: Uuid,
    pub job_id: Uuid,
    pub entities: serde_json::Value,
    pub keywords: serde_json::Value,
    pub business_indicators: serde_json::Value,
    pub financial_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A tagged span found in the document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub entity_type: String,
    pub text: String,
    pub offset: usize,
    pub page: Option<u32>,
}
