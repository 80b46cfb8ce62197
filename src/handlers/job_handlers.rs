use std::sync::Arc;

use actix_web::{HttpResponse, delete, get, patch, post, web};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{AnalysisRepository, ChunkRepository, JobRepository, PredictionRepository};
use crate::error::AppError;
use crate::models::{Job, JobStatus};
use crate::services::pipeline_service::pages_from_chunks;
use crate::services::{JobProgress, PipelineService};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerQuery {
    user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsQuery {
    user_id: Option<Uuid>,
    status: Option<String>,
    skip: Option<i64>,
    limit: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobListResponse {
    jobs: Vec<Job>,
    total: i64,
    skip: i64,
    limit: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: String,
    progress: ProgressBody,
    stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressBody {
    current: u32,
    total: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageResponse {
    page_content: String,
    filename: String,
    total_pages: i32,
    page_number: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleBody {
    title: String,
}

/// Loads a job and enforces ownership when the caller names a user.
/// A job owned by someone else is reported as absent, never as forbidden.
async fn load_owned_job(
    jobs: &JobRepository,
    job_id: &Uuid,
    user_id: Option<Uuid>,
) -> Result<Job, AppError> {
    let job = jobs
        .get_by_id(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;
    if let Some(user_id) = user_id {
        if job.user_id != user_id {
            return Err(AppError::NotFound(format!("Job {} not found", job_id)));
        }
    }
    Ok(job)
}

/// `GET /jobs/{id}`: full record with ordered analysis points and the
/// latest prediction.
#[get("/jobs/{id}")]
pub async fn get_job(
    path: web::Path<Uuid>,
    query: web::Query<OwnerQuery>,
    jobs: web::Data<JobRepository>,
    analyses: web::Data<AnalysisRepository>,
    predictions: web::Data<PredictionRepository>,
) -> Result<HttpResponse, AppError> {
    let job_id = path.into_inner();
    let job = load_owned_job(&jobs, &job_id, query.user_id).await?;

    let points = analyses.points_for_job(&job_id).await?;
    let prediction = predictions.latest_for_job(&job_id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "job": job,
        "points": points,
        "prediction": prediction,
    })))
}

/// `GET /jobs/{id}/status`: lifecycle status with pipeline progress.
#[get("/jobs/{id}/status")]
pub async fn get_job_status(
    path: web::Path<Uuid>,
    query: web::Query<OwnerQuery>,
    jobs: web::Data<JobRepository>,
    pipeline: web::Data<Arc<PipelineService>>,
) -> Result<HttpResponse, AppError> {
    let job_id = path.into_inner();
    let job = load_owned_job(&jobs, &job_id, query.user_id).await?;

    let progress = pipeline.progress(&job_id).await.unwrap_or(JobProgress {
        current: 0,
        total: 0,
        stage: job.status.clone(),
    });

    Ok(HttpResponse::Ok().json(StatusResponse {
        status: job.status.clone(),
        progress: ProgressBody { current: progress.current, total: progress.total },
        stage: progress.stage,
        error: job.error_message,
    }))
}

/// `GET /jobs/{id}/page/{n}`: content of one page, served from the chunk
/// covering it, with a graceful fallback when no chunk covers the page.
#[get("/jobs/{id}/page/{page}")]
pub async fn get_job_page(
    path: web::Path<(Uuid, i32)>,
    query: web::Query<OwnerQuery>,
    jobs: web::Data<JobRepository>,
    chunks: web::Data<ChunkRepository>,
) -> Result<HttpResponse, AppError> {
    let (job_id, page_number) = path.into_inner();
    let job = load_owned_job(&jobs, &job_id, query.user_id).await?;
    let total_pages = job.page_count.unwrap_or(0);

    if page_number < 1 || (total_pages > 0 && page_number > total_pages) {
        return Err(AppError::PageOutOfRange(format!(
            "page {} outside of 1..={}",
            page_number, total_pages
        )));
    }

    let page_content = match chunks.get_covering_page(&job_id, page_number).await? {
        Some(chunk) => {
            let pages = pages_from_chunks(std::slice::from_ref(&chunk));
            pages
                .get(&(page_number as u32))
                .cloned()
                .unwrap_or_else(|| chunk.raw_text.clone())
        }
        None => format!(
            "Conteúdo da página {} ainda não disponível. O documento pode estar em processamento.",
            page_number
        ),
    };

    Ok(HttpResponse::Ok().json(PageResponse {
        page_content,
        filename: job.filename,
        total_pages,
        page_number,
    }))
}

/// `GET /jobs`: jobs of one user with pagination and status filter. With
/// no `userId` the response is an empty list, never cross-tenant data.
#[get("/jobs")]
pub async fn list_jobs(
    query: web::Query<ListJobsQuery>,
    jobs: web::Data<JobRepository>,
) -> Result<HttpResponse, AppError> {
    let skip = query.skip.unwrap_or(0).max(0);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let Some(user_id) = query.user_id else {
        return Ok(HttpResponse::Ok().json(JobListResponse {
            jobs: Vec::new(),
            total: 0,
            skip,
            limit,
        }));
    };

    if let Some(status) = query.status.as_deref() {
        if JobStatus::parse(status).is_none() {
            return Err(AppError::Validation(format!("Unknown status '{}'", status)));
        }
    }

    let (jobs, total) = jobs
        .list_for_user(&user_id, query.status.as_deref(), skip, limit)
        .await?;
    Ok(HttpResponse::Ok().json(JobListResponse { jobs, total, skip, limit }))
}

/// `PATCH /jobs/{id}/title`: updates the display title.
#[patch("/jobs/{id}/title")]
pub async fn update_job_title(
    path: web::Path<Uuid>,
    query: web::Query<OwnerQuery>,
    body: web::Json<TitleBody>,
    jobs: web::Data<JobRepository>,
) -> Result<HttpResponse, AppError> {
    let job_id = path.into_inner();
    load_owned_job(&jobs, &job_id, query.user_id).await?;

    let title = body.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Title must not be empty".to_string()));
    }

    let job = jobs.set_title(&job_id, title).await?;
    Ok(HttpResponse::Ok().json(job))
}

/// `DELETE /jobs/{id}`: cascades over all dependent rows, revokes
/// outstanding tasks and removes stored objects. Allowed in any state.
#[delete("/jobs/{id}")]
pub async fn delete_job(
    path: web::Path<Uuid>,
    query: web::Query<OwnerQuery>,
    jobs: web::Data<JobRepository>,
    pipeline: web::Data<Arc<PipelineService>>,
) -> Result<HttpResponse, AppError> {
    let job_id = path.into_inner();
    load_owned_job(&jobs, &job_id, query.user_id).await?;

    let deleted = pipeline.delete_job(&job_id).await?;
    if !deleted {
        return Err(AppError::NotFound(format!("Job {} not found", job_id)));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": true, "jobId": job_id })))
}

/// `POST /jobs/{id}/retry`: failed -> uploaded, then the pipeline restarts
/// from validation. Requires the original object to still exist.
#[post("/jobs/{id}/retry")]
pub async fn retry_job(
    path: web::Path<Uuid>,
    query: web::Query<OwnerQuery>,
    jobs: web::Data<JobRepository>,
    pipeline: web::Data<Arc<PipelineService>>,
) -> Result<HttpResponse, AppError> {
    let job_id = path.into_inner();
    load_owned_job(&jobs, &job_id, query.user_id).await?;

    let job = pipeline.retry_job(&job_id).await?;
    Ok(HttpResponse::Ok().json(job))
}
