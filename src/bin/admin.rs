//! Admin utilities for the pipeline: storage health, dead-letter requeue,
//! manual retraining and cache clearing.
//!
//! Exit codes: 0 success, 1 user error, 2 transient failure, 3 internal
//! error.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use arremate_server::cache::CacheLayer;
use arremate_server::config::AppSettings;
use arremate_server::db::connection::create_pool;
use arremate_server::db::{
    ChunkRepository, FeedbackRepository, JobRepository, ModelArtifactRepository,
    PredictionRepository, TaskAuditRepository,
};
use arremate_server::error::AppError;
use arremate_server::ml::ModelRegistry;
use arremate_server::queue::TaskBroker;
use arremate_server::services::{FeedbackLog, LearningService};
use arremate_server::storage;

const USAGE: &str = "usage: admin <storage-check | requeue-dead | retrain | cache-clear>";

fn exit_code_for(error: &AppError) -> ExitCode {
    if error.is_retryable() {
        ExitCode::from(2)
    } else if error.is_permanent() {
        ExitCode::from(1)
    } else {
        ExitCode::from(3)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        eprintln!("{}", USAGE);
        return ExitCode::from(1);
    };

    let settings = match AppSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    let result = match command {
        "storage-check" => storage_check(&settings).await,
        "requeue-dead" => requeue_dead(&settings).await,
        "retrain" => retrain(&settings).await,
        "cache-clear" => cache_clear(&settings).await,
        _ => {
            eprintln!("unknown command '{}'\n{}", command, USAGE);
            return ExitCode::from(1);
        }
    };

    match result {
        Ok(message) => {
            println!("{}", message);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", command, e);
            exit_code_for(&e)
        }
    }
}

async fn storage_check(settings: &AppSettings) -> Result<String, AppError> {
    let backend = storage::make_storage(&settings.storage)?;
    backend.health_check().await?;
    Ok(format!("storage backend '{}' is reachable", backend.strategy()))
}

async fn requeue_dead(settings: &AppSettings) -> Result<String, AppError> {
    let pool = create_pool(&settings.database.url).await?;
    let broker = TaskBroker::connect(
        &settings.redis.url,
        TaskAuditRepository::new(pool),
        settings.queue.depth_cap,
    )
    .await?;
    let count = broker.requeue_dead().await?;
    Ok(format!("requeued {} dead-lettered tasks", count))
}

async fn retrain(settings: &AppSettings) -> Result<String, AppError> {
    let pool = create_pool(&settings.database.url).await?;
    let backend = storage::make_storage(&settings.storage)?;
    let registry = Arc::new(ModelRegistry::new(
        backend.clone(),
        ModelArtifactRepository::new(pool.clone()),
    ));
    registry.warm_up().await?;

    let broker = TaskBroker::connect(
        &settings.redis.url,
        TaskAuditRepository::new(pool.clone()),
        settings.queue.depth_cap,
    )
    .await?;
    let learning = LearningService::new(
        JobRepository::new(pool.clone()),
        ChunkRepository::new(pool.clone()),
        PredictionRepository::new(pool.clone()),
        FeedbackRepository::new(pool),
        registry,
        backend,
        broker,
        FeedbackLog::new(&settings.learning.feedback_dir)?,
        settings.learning.clone(),
        settings.queue.ml_time_limit_secs,
    );

    let outcome = learning.retrain().await?;
    Ok(format!(
        "retrained on {} samples ({} with feedback): forest v{}, boosting v{}",
        outcome.samples, outcome.feedback_samples, outcome.forest_version, outcome.boosting_version
    ))
}

async fn cache_clear(settings: &AppSettings) -> Result<String, AppError> {
    let cache = CacheLayer::connect(&settings.redis.url, settings.cache.ttl_secs).await;
    cache.delete("dashboard:global").await;
    Ok("cleared the global dashboard cache entry".to_string())
}
