use actix_multipart::Multipart;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::io::Write;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::error::AppError;

/// Parsed `/upload` form: the PDF is spooled to a scratch file, never held
/// in memory whole. The scratch file is removed when the value drops.
pub struct UploadMultipartData {
    pub scratch: NamedTempFile,
    pub filename: String,
    pub file_size: u64,
    pub file_hash: String,
    pub user_id: Uuid,
    pub enhanced_analysis: bool,
}

pub async fn process_upload_multipart(
    mut payload: Multipart,
    max_size_bytes: u64,
) -> Result<UploadMultipartData, AppError> {
    let mut scratch: Option<NamedTempFile> = None;
    let mut filename = String::new();
    let mut file_size: u64 = 0;
    let mut file_hash = String::new();
    let mut user_id: Option<Uuid> = None;
    let mut enhanced_analysis = false;

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let content_disposition = field.content_disposition().ok_or_else(|| {
            AppError::BadRequest("Content-Disposition header missing".to_string())
        })?;
        let field_name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::BadRequest("Field name missing".to_string()))?;

        match field_name {
            "file" => {
                if let Some(fname) = content_disposition.get_filename() {
                    filename = fname.to_string();
                }

                let mut tmp = NamedTempFile::new()
                    .map_err(|e| AppError::Storage(format!("scratch file: {}", e)))?;
                let mut hasher = Sha256::new();
                let mut written: u64 = 0;

                while let Some(chunk) = field.next().await {
                    let chunk = chunk?;
                    written += chunk.len() as u64;
                    if written > max_size_bytes {
                        return Err(AppError::FileTooLarge(format!(
                            "file exceeds the {} byte limit",
                            max_size_bytes
                        )));
                    }
                    hasher.update(&chunk);
                    tmp.write_all(&chunk)
                        .map_err(|e| AppError::Storage(format!("scratch write: {}", e)))?;
                }
                tmp.flush()
                    .map_err(|e| AppError::Storage(format!("scratch flush: {}", e)))?;

                file_size = written;
                file_hash = hex::encode(hasher.finalize());
                scratch = Some(tmp);
            }
            "userId" => {
                let mut data = Vec::new();
                while let Some(chunk) = field.next().await {
                    data.extend_from_slice(&chunk?);
                }
                let raw = String::from_utf8(data)
                    .map_err(|_| AppError::BadRequest("Invalid userId encoding".to_string()))?;
                let parsed = Uuid::parse_str(raw.trim())
                    .map_err(|_| AppError::BadRequest("userId must be a UUID".to_string()))?;
                user_id = Some(parsed);
            }
            "enhancedAnalysis" => {
                let mut data = Vec::new();
                while let Some(chunk) = field.next().await {
                    data.extend_from_slice(&chunk?);
                }
                enhanced_analysis = String::from_utf8_lossy(&data).trim() == "true";
            }
            _ => {
                // Skip other fields
            }
        }
    }

    let scratch = scratch
        .ok_or_else(|| AppError::BadRequest("No file provided in 'file' field".to_string()))?;
    if file_size == 0 {
        return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
    }
    if !filename.to_lowercase().ends_with(".pdf") {
        return Err(AppError::InvalidFileFormat("Only PDF files are accepted".to_string()));
    }
    let user_id =
        user_id.ok_or_else(|| AppError::BadRequest("Missing 'userId' field".to_string()))?;

    Ok(UploadMultipartData {
        scratch,
        filename,
        file_size,
        file_hash,
        user_id,
        enhanced_analysis,
    })
}
