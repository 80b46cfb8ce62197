use actix_web::{HttpResponse, error::ResponseError, http::StatusCode};
use serde::{Deserialize, Serialize};
use sqlx::error::Error as SqlxError;
use std::error::Error as StdError;
use std::fmt;

#[derive(Debug, Clone)]
pub enum AppError {
    Database(String),
    DatabaseConnection(String),
    Internal(String),
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Configuration(String),
    Validation(String),
    FileTooLarge(String),
    InvalidFileFormat(String),
    Processing(String),
    PdfInvalid(String),
    PdfEncrypted(String),
    PageOutOfRange(String),
    ExtractionFailed(String),
    ModelUnavailable(String),
    Storage(String),
    StorageConnection(String),
    QueueFull(String),
    TaskRevoked(String),
    Serialization(String),
    InvalidJobState { current: String, required: String },
    AlreadyExists(String),
    TooManyRequests(String),
    Cancelled(String),
    Timeout(String),
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    code: u16,
    message: String,
    error_type: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Database(e) => write!(f, "Database error: {}", e),
            AppError::DatabaseConnection(e) => write!(f, "Database connection error: {}", e),
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::NotFound(e) => write!(f, "Not found: {}", e),
            AppError::BadRequest(e) => write!(f, "Bad request: {}", e),
            AppError::Forbidden(e) => write!(f, "Forbidden: {}", e),
            AppError::Configuration(e) => write!(f, "Configuration error: {}", e),
            AppError::Validation(e) => write!(f, "Validation error: {}", e),
            AppError::FileTooLarge(e) => write!(f, "File too large: {}", e),
            AppError::InvalidFileFormat(e) => write!(f, "Invalid file format: {}", e),
            AppError::Processing(e) => write!(f, "Processing error: {}", e),
            AppError::PdfInvalid(e) => write!(f, "Invalid PDF: {}", e),
            AppError::PdfEncrypted(e) => write!(f, "Encrypted PDF: {}", e),
            AppError::PageOutOfRange(e) => write!(f, "Page out of range: {}", e),
            AppError::ExtractionFailed(e) => write!(f, "Extraction failed: {}", e),
            AppError::ModelUnavailable(e) => write!(f, "ML model unavailable: {}", e),
            AppError::Storage(e) => write!(f, "Storage error: {}", e),
            AppError::StorageConnection(e) => write!(f, "Storage connection error: {}", e),
            AppError::QueueFull(e) => write!(f, "Queue full: {}", e),
            AppError::TaskRevoked(e) => write!(f, "Task revoked: {}", e),
            AppError::Serialization(e) => write!(f, "Serialization error: {}", e),
            AppError::InvalidJobState { current, required } => {
                write!(f, "Invalid job state: current '{}', required '{}'", current, required)
            }
            AppError::AlreadyExists(e) => write!(f, "Already exists: {}", e),
            AppError::TooManyRequests(e) => write!(f, "Too many requests: {}", e),
            AppError::Cancelled(e) => write!(f, "Cancelled: {}", e),
            AppError::Timeout(e) => write!(f, "Timeout: {}", e),
        }
    }
}

impl StdError for AppError {}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status_code, error_type) = self.classify();

        let error_response = ErrorResponse {
            code: status_code.as_u16(),
            message: self.to_string(),
            error_type: error_type.to_string(),
        };

        let mut builder = HttpResponse::build(status_code);
        if let Some(secs) = self.retry_after_secs() {
            builder.insert_header(("Retry-After", secs.to_string()));
        }
        builder.json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        self.classify().0
    }
}

impl AppError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::DatabaseConnection(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "database_connection_error")
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::Configuration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::FileTooLarge(_) => (StatusCode::BAD_REQUEST, "file_too_large"),
            AppError::InvalidFileFormat(_) => (StatusCode::BAD_REQUEST, "invalid_file_format"),
            AppError::Processing(_) => (StatusCode::UNPROCESSABLE_ENTITY, "processing_error"),
            AppError::PdfInvalid(_) => (StatusCode::UNPROCESSABLE_ENTITY, "pdf_invalid"),
            AppError::PdfEncrypted(_) => (StatusCode::UNPROCESSABLE_ENTITY, "pdf_encrypted"),
            AppError::PageOutOfRange(_) => (StatusCode::BAD_REQUEST, "page_out_of_range"),
            AppError::ExtractionFailed(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "extraction_failed")
            }
            AppError::ModelUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "ml_model_unavailable")
            }
            AppError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            AppError::StorageConnection(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage_connection_error")
            }
            AppError::QueueFull(_) => (StatusCode::SERVICE_UNAVAILABLE, "queue_full"),
            AppError::TaskRevoked(_) => (StatusCode::CONFLICT, "task_revoked"),
            AppError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error")
            }
            AppError::InvalidJobState { .. } => (StatusCode::CONFLICT, "invalid_job_state"),
            AppError::AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists"),
            AppError::TooManyRequests(_) => (StatusCode::TOO_MANY_REQUESTS, "too_many_requests"),
            AppError::Cancelled(_) => (StatusCode::INTERNAL_SERVER_ERROR, "cancelled"),
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        }
    }

    /// Returns true if this error is permanent and should not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::FileTooLarge(_)
                | AppError::InvalidFileFormat(_)
                | AppError::NotFound(_)
                | AppError::AlreadyExists(_)
                | AppError::Configuration(_)
                | AppError::BadRequest(_)
                | AppError::Forbidden(_)
                | AppError::PdfInvalid(_)
                | AppError::PdfEncrypted(_)
                | AppError::PageOutOfRange(_)
                | AppError::InvalidJobState { .. }
                | AppError::TaskRevoked(_)
        )
    }

    /// Returns true if the error is transient and a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::DatabaseConnection(_)
                | AppError::StorageConnection(_)
                | AppError::QueueFull(_)
                | AppError::TooManyRequests(_)
                | AppError::Timeout(_)
        )
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AppError::QueueFull(_) => Some(5),
            AppError::TooManyRequests(_) => Some(30),
            _ => None,
        }
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::NotFound("Record not found".to_string()),
            SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Io(_) => {
                AppError::DatabaseConnection(error.to_string())
            }
            _ => AppError::Database(error.to_string()),
        }
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(error: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Multipart error: {}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Serialization(format!("JSON serialization error: {}", error))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(error: redis::RedisError) -> Self {
        if error.is_connection_refusal() || error.is_timeout() || error.is_io_error() {
            AppError::StorageConnection(format!("Redis connection error: {}", error))
        } else {
            AppError::Internal(format!("Redis error: {}", error))
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        AppError::Storage(format!("I/O error: {}", error))
    }
}

// Define AppResult type alias for Result<T, AppError>
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_errors_are_not_retryable() {
        let err = AppError::PdfInvalid("no header".to_string());
        assert!(err.is_permanent());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_connection_errors_are_retryable() {
        let err = AppError::DatabaseConnection("refused".to_string());
        assert!(err.is_retryable());
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_queue_full_maps_to_503_with_retry_after() {
        let err = AppError::QueueFull("pdf queue at capacity".to_string());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.retry_after_secs(), Some(5));
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: AppError = SqlxError::RowNotFound.into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
