use std::env;
use crate::error::AppError;
use serde::{Deserialize, Serialize};


#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub pdf: PdfConfig,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
    pub learning: LearningConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: String,
    pub local_path: String,
    pub s3_bucket: Option<String>,
    pub s3_region: String,
    pub s3_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PdfConfig {
    pub max_size_mb: u64,
    pub chunk_size: u32,
    pub chunk_overlap: u32,
    pub extractor_pool: usize,
}

impl PdfConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    pub worker_concurrency: usize,
    pub depth_cap: u64,
    pub upload_time_limit_secs: u64,
    pub chunk_time_limit_secs: u64,
    pub analysis_time_limit_secs: u64,
    pub ml_time_limit_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LearningConfig {
    pub uncertainty_threshold: f64,
    pub disagreement_threshold: f64,
    pub min_feedback_for_retrain: usize,
    pub min_new_samples: i64,
    pub performance_floor: f64,
    pub max_days_without_training: i64,
    pub feedback_dir: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, AppError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .map_err(|_| AppError::Configuration(format!("{} must be a valid number", key)))
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        // App config
        let app_name = env::var("APP_NAME").unwrap_or_else(|_| "arremate-pipeline".to_string());
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        // Database config
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Configuration("DATABASE_URL must be set".to_string()))?;

        // Redis (task broker + cache)
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());

        // Server config
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port: u16 = env_parse("SERVER_PORT", "8000")?;

        // CORS origins
        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let server_url = env::var("SERVER_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", server_host, server_port));

        // Storage backend selection
        let storage_backend = env::var("STORAGE_BACKEND").unwrap_or_else(|_| "local".to_string());
        if storage_backend != "local" && storage_backend != "s3" {
            return Err(AppError::Configuration(
                "STORAGE_BACKEND must be 'local' or 's3'".to_string(),
            ));
        }
        let storage_local_path =
            env::var("STORAGE_PATH").unwrap_or_else(|_| "./data/storage".to_string());
        let s3_bucket = env::var("S3_BUCKET").ok();
        if storage_backend == "s3" && s3_bucket.is_none() {
            return Err(AppError::Configuration(
                "S3_BUCKET must be set when STORAGE_BACKEND is 's3'".to_string(),
            ));
        }
        let s3_region = env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let s3_endpoint_url = env::var("S3_ENDPOINT_URL").ok();
        let aws_access_key_id = env::var("AWS_ACCESS_KEY_ID").ok();
        let aws_secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok();

        // PDF processing
        let max_pdf_size_mb: u64 = env_parse("MAX_PDF_SIZE_MB", "500")?;
        let pdf_chunk_size: u32 = env_parse("PDF_CHUNK_SIZE", "5")?;
        let pdf_chunk_overlap: u32 = env_parse("PDF_CHUNK_OVERLAP", "1")?;
        let pdf_extractor_pool: usize = env_parse("PDF_EXTRACTOR_POOL", "4")?;
        if pdf_chunk_size == 0 {
            return Err(AppError::Configuration(
                "PDF_CHUNK_SIZE must be at least 1".to_string(),
            ));
        }
        if pdf_chunk_overlap >= pdf_chunk_size {
            return Err(AppError::Configuration(
                "PDF_CHUNK_OVERLAP must be smaller than PDF_CHUNK_SIZE".to_string(),
            ));
        }

        // Task queue
        let worker_concurrency: usize = env_parse("WORKER_CONCURRENCY", "6")?;
        let queue_depth_cap: u64 = env_parse("QUEUE_DEPTH_CAP", "10000")?;
        let upload_time_limit_secs: u64 = env_parse("UPLOAD_TIME_LIMIT_SECS", "300")?;
        let chunk_time_limit_secs: u64 = env_parse("CHUNK_TIME_LIMIT_SECS", "600")?;
        let analysis_time_limit_secs: u64 = env_parse("ANALYSIS_TIME_LIMIT_SECS", "1200")?;
        let ml_time_limit_secs: u64 = env_parse("ML_TIME_LIMIT_SECS", "900")?;

        // Cache
        let cache_ttl_secs: u64 = env_parse("CACHE_TTL_SECS", "300")?;

        // Learning loop
        let uncertainty_threshold: f64 = env_parse("UNCERTAINTY_THRESHOLD", "0.3")?;
        let disagreement_threshold: f64 = env_parse("DISAGREEMENT_THRESHOLD", "0.2")?;
        let min_feedback_for_retrain: usize = env_parse("MIN_FEEDBACK_FOR_RETRAIN", "20")?;
        let min_new_samples: i64 = env_parse("MIN_NEW_SAMPLES", "50")?;
        let performance_floor: f64 = env_parse("PERFORMANCE_FLOOR", "0.85")?;
        let max_days_without_training: i64 = env_parse("MAX_DAYS_WITHOUT_TRAINING", "30")?;
        let feedback_dir =
            env::var("FEEDBACK_DIR").unwrap_or_else(|_| "./data/feedback".to_string());

        Ok(Self {
            app: AppConfig {
                name: app_name,
                environment,
            },
            database: DatabaseConfig { url: database_url },
            redis: RedisConfig { url: redis_url },
            server: ServerConfig {
                host: server_host,
                port: server_port,
                cors_origins,
                url: server_url,
            },
            storage: StorageConfig {
                backend: storage_backend,
                local_path: storage_local_path,
                s3_bucket,
                s3_region,
                s3_endpoint_url,
                aws_access_key_id,
                aws_secret_access_key,
            },
            pdf: PdfConfig {
                max_size_mb: max_pdf_size_mb,
                chunk_size: pdf_chunk_size,
                chunk_overlap: pdf_chunk_overlap,
                extractor_pool: pdf_extractor_pool,
            },
            queue: QueueConfig {
                worker_concurrency,
                depth_cap: queue_depth_cap,
                upload_time_limit_secs,
                chunk_time_limit_secs,
                analysis_time_limit_secs,
                ml_time_limit_secs,
            },
            cache: CacheConfig {
                ttl_secs: cache_ttl_secs,
            },
            learning: LearningConfig {
                uncertainty_threshold,
                disagreement_threshold,
                min_feedback_for_retrain,
                min_new_samples,
                performance_floor,
                max_days_without_training,
                feedback_dir,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_config_size_conversion() {
        let cfg = PdfConfig {
            max_size_mb: 500,
            chunk_size: 5,
            chunk_overlap: 1,
            extractor_pool: 4,
        };
        assert_eq!(cfg.max_size_bytes(), 500 * 1024 * 1024);
    }
}
