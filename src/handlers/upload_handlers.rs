use std::sync::Arc;
use std::time::Duration;

use actix_multipart::Multipart;
use actix_web::{HttpResponse, post, web};
use serde::Serialize;

use crate::config::AppSettings;
use crate::db::JobRepository;
use crate::error::AppError;
use crate::models::{CreateJobRequest, JobConfig};
use crate::services::PipelineService;
use crate::storage::{ObjectStorage, PresignMethod, PutBody};
use crate::utils::multipart_utils::process_upload_multipart;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadStorageInfo {
    strategy: String,
    location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    job_id: String,
    message: String,
    file_size: u64,
    storage: UploadStorageInfo,
}

/// `POST /upload`: accepts a PDF (multipart `file` + `userId`), persists
/// the original under `documents/{user}/{job}/{filename}` and starts the
/// processing pipeline. The local scratch copy is always removed.
#[post("/upload")]
pub async fn upload_document(
    payload: Multipart,
    settings: web::Data<AppSettings>,
    jobs: web::Data<JobRepository>,
    storage: web::Data<Arc<dyn ObjectStorage>>,
    pipeline: web::Data<Arc<PipelineService>>,
) -> Result<HttpResponse, AppError> {
    let upload = process_upload_multipart(payload, settings.pdf.max_size_bytes()).await?;

    let job = jobs
        .create(CreateJobRequest {
            user_id: upload.user_id,
            filename: upload.filename.clone(),
            file_size: upload.file_size as i64,
            file_hash: upload.file_hash.clone(),
            config: JobConfig { enhanced_analysis: upload.enhanced_analysis, ..Default::default() },
        })
        .await?;

    let key = job.storage_key();
    let put_result = storage
        .put(
            &key,
            PutBody::File(upload.scratch.path().to_path_buf()),
            "application/pdf",
            Default::default(),
        )
        .await
        .map_err(AppError::from)?;
    log::info!(
        "Stored original of job {} at {} ({} bytes, etag {})",
        job.id,
        key,
        put_result.size,
        put_result.etag
    );

    // The scratch file is dropped here regardless of what follows.
    drop(upload.scratch);

    pipeline.start_job(&job.id).await?;

    let url = match storage.strategy() {
        "s3" => storage
            .presigned_url(&key, Duration::from_secs(3600), PresignMethod::Get)
            .await
            .ok(),
        _ => None,
    };

    Ok(HttpResponse::Ok().json(UploadResponse {
        job_id: job.id.to_string(),
        message: "Documento recebido; processamento iniciado".to_string(),
        file_size: upload.file_size,
        storage: UploadStorageInfo {
            strategy: storage.strategy().to_string(),
            location: key,
            url,
        },
    }))
}
