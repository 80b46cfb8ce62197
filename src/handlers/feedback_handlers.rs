use std::sync::Arc;

use actix_web::{HttpResponse, get, post, web};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::{FeedbackRepository, JobRepository};
use crate::error::AppError;
use crate::ml::ModelRegistry;
use crate::services::LearningService;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackBody {
    answers: serde_json::Value,
    #[serde(default)]
    metadata: serde_json::Value,
}

/// `GET /feedback/pending`: outstanding feedback requests produced by the
/// uncertainty sweep.
#[get("/feedback/pending")]
pub async fn pending_feedback(
    feedback: web::Data<FeedbackRepository>,
) -> Result<HttpResponse, AppError> {
    let requests = feedback.pending_requests(50).await?;
    let count = requests.len();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "requests": requests,
        "count": count,
    })))
}

/// `POST /jobs/{id}/feedback`: stores a user's questionnaire answers.
#[post("/jobs/{id}/feedback")]
pub async fn submit_feedback(
    path: web::Path<Uuid>,
    body: web::Json<FeedbackBody>,
    jobs: web::Data<JobRepository>,
    learning: web::Data<Arc<LearningService>>,
) -> Result<HttpResponse, AppError> {
    let job_id = path.into_inner();
    jobs.get_by_id(&job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

    let body = body.into_inner();
    if !body.answers.is_object() || body.answers.as_object().is_some_and(|m| m.is_empty()) {
        return Err(AppError::Validation("answers must be a non-empty object".to_string()));
    }

    learning
        .record_feedback(&job_id, body.answers, body.metadata)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Feedback registrado",
        "jobId": job_id,
    })))
}

/// `GET /models`: registered model versions with their metrics.
#[get("/models")]
pub async fn list_models(
    registry: web::Data<Arc<ModelRegistry>>,
) -> Result<HttpResponse, AppError> {
    let artifacts = registry.list().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "models": artifacts })))
}
