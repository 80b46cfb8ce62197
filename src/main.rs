use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Logger, web};
use dotenv::dotenv;
use std::net::TcpListener;
use std::sync::Arc;

mod analysis;
mod cache;
mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod ml;
mod models;
mod pdf;
mod queue;
mod routes;
mod services;
mod storage;
mod utils;

use crate::cache::CacheLayer;
use crate::config::AppSettings;
use crate::db::connection::{create_pool, verify_connection};
use crate::db::{
    AnalysisRepository, ChunkRepository, DashboardRepository, FeedbackRepository, JobRepository,
    ModelArtifactRepository, PredictionRepository, TaskAuditRepository,
};
use crate::ml::{ModelRegistry, ScoringEngine};
use crate::queue::scheduler::PeriodicSchedules;
use crate::queue::{TaskBroker, WorkerPool};
use crate::routes::configure_api_routes;
use crate::services::{
    DashboardService, FeedbackLog, LearningService, PipelineService, TaskRouter,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Load application settings from environment
    let settings = match AppSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Failed to load application settings from environment: {}", e);
            log::error!("Cannot start server without valid settings");
            std::process::exit(1);
        }
    };

    // Database connection setup
    let db_pool = match create_pool(&settings.database.url).await {
        Ok(pool) => {
            if let Err(e) = verify_connection(&pool).await {
                log::error!("Database connection verification failed: {}", e);
                log::error!("Cannot start server without a working database connection");
                std::process::exit(1);
            }
            pool
        }
        Err(e) => {
            log::error!("Failed to create database connection pool: {}", e);
            std::process::exit(1);
        }
    };

    // Object storage backend (selected by configuration)
    let object_storage = match storage::make_storage(&settings.storage) {
        Ok(storage) => storage,
        Err(e) => {
            log::error!("Failed to initialize storage backend: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("Storage backend '{}' initialized", object_storage.strategy());

    // Best-effort cache layer
    let cache = CacheLayer::connect(&settings.redis.url, settings.cache.ttl_secs).await;

    // Task broker over redis
    let audit_repository = TaskAuditRepository::new(db_pool.clone());
    let broker = match TaskBroker::connect(&settings.redis.url, audit_repository, settings.queue.depth_cap)
        .await
    {
        Ok(broker) => broker,
        Err(e) => {
            log::error!("Failed to connect task broker: {}", e);
            log::error!("Cannot start server without a working task broker");
            std::process::exit(1);
        }
    };

    // Model registry with persisted versions loaded up front
    let registry = Arc::new(ModelRegistry::new(
        object_storage.clone(),
        ModelArtifactRepository::new(db_pool.clone()),
    ));
    if let Err(e) = registry.warm_up().await {
        log::warn!("Model registry warm-up failed (continuing untrained): {}", e);
    }
    let scoring = Arc::new(ScoringEngine::new(registry.clone()));

    // Repositories
    let job_repository = JobRepository::new(db_pool.clone());
    let chunk_repository = ChunkRepository::new(db_pool.clone());
    let analysis_repository = AnalysisRepository::new(db_pool.clone());
    let prediction_repository = PredictionRepository::new(db_pool.clone());
    let feedback_repository = FeedbackRepository::new(db_pool.clone());
    let dashboard_repository = DashboardRepository::new(db_pool.clone());

    // Services
    let pipeline = Arc::new(PipelineService::new(
        job_repository.clone(),
        chunk_repository.clone(),
        analysis_repository.clone(),
        prediction_repository.clone(),
        broker.clone(),
        object_storage.clone(),
        cache.clone(),
        scoring.clone(),
        settings.clone(),
    ));

    let feedback_log = match FeedbackLog::new(&settings.learning.feedback_dir) {
        Ok(log) => log,
        Err(e) => {
            log::error!("Failed to initialize feedback log: {}", e);
            std::process::exit(1);
        }
    };
    let learning = Arc::new(LearningService::new(
        job_repository.clone(),
        chunk_repository.clone(),
        prediction_repository.clone(),
        feedback_repository.clone(),
        registry.clone(),
        object_storage.clone(),
        broker.clone(),
        feedback_log,
        settings.learning.clone(),
        settings.queue.ml_time_limit_secs,
    ));

    let dashboard = Arc::new(DashboardService::new(
        dashboard_repository,
        cache.clone(),
        settings.cache.ttl_secs,
    ));

    // Worker pool draining the task queues
    let router = Arc::new(TaskRouter { pipeline: pipeline.clone(), learning: learning.clone() });
    let workers = WorkerPool::new(broker.clone(), router, settings.queue.worker_concurrency);
    workers.start();
    log::info!("Worker pool started with {} executors", settings.queue.worker_concurrency);

    // Periodic schedules: uncertainty sweep (6h), feedback batch (12h),
    // auto-retraining (daily), dashboard snapshot cleanup (hourly). The
    // handle stays alive for the lifetime of the server.
    let schedules = match PeriodicSchedules::new().await {
        Ok(schedules) => schedules,
        Err(e) => {
            log::error!("Failed to create scheduler: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = register_schedules(&schedules, learning.clone(), dashboard.clone()).await {
        log::error!("Failed to start periodic schedules: {}", e);
        std::process::exit(1);
    }
    log::info!("Periodic schedules registered");

    let host = settings.server.host.clone();
    let port = settings.server.port;
    log::info!("Starting server at http://{}:{}", host, port);
    let listener = TcpListener::bind(format!("{}:{}", host, port))?;

    let settings_data = web::Data::new(settings.clone());
    HttpServer::new(move || {
        // Configure CORS using actix-cors
        let mut cors = Cors::default().supports_credentials();
        if settings.server.cors_origins.contains(&"*".to_string()) {
            cors = Cors::default().allow_any_origin();
        } else {
            for origin in &settings.server.cors_origins {
                cors = cors.allowed_origin(origin);
            }
        }
        cors = cors.allow_any_method().allow_any_header();

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(settings_data.clone())
            .app_data(web::Data::new(job_repository.clone()))
            .app_data(web::Data::new(chunk_repository.clone()))
            .app_data(web::Data::new(analysis_repository.clone()))
            .app_data(web::Data::new(prediction_repository.clone()))
            .app_data(web::Data::new(feedback_repository.clone()))
            .app_data(web::Data::new(object_storage.clone()))
            .app_data(web::Data::new(pipeline.clone()))
            .app_data(web::Data::new(learning.clone()))
            .app_data(web::Data::new(dashboard.clone()))
            .app_data(web::Data::new(registry.clone()))
            // Health check endpoint without the /api prefix
            .service(web::resource("/health").route(web::get().to(handlers::health::health_check)))
            // API routes
            .service(web::scope("/api/v1").configure(configure_api_routes))
    })
    .listen(listener)?
    .run()
    .await
}

async fn register_schedules(
    schedules: &PeriodicSchedules,
    learning: Arc<LearningService>,
    dashboard: Arc<DashboardService>,
) -> Result<(), error::AppError> {
    let learning_sweep = learning.clone();
    schedules
        .register("uncertainty-sweep", "0 0 */6 * * *", move || {
            let learning = learning_sweep.clone();
            async move { learning.uncertainty_sweep().await.map(|_| ()) }
        })
        .await?;

    let learning_batch = learning.clone();
    schedules
        .register("feedback-batch", "0 30 */12 * * *", move || {
            let learning = learning_batch.clone();
            async move { learning.feedback_batch().await.map(|_| ()) }
        })
        .await?;

    schedules
        .register("auto-retraining", "0 15 3 * * *", move || {
            let learning = learning.clone();
            async move { learning.auto_retraining_check().await.map(|_| ()) }
        })
        .await?;

    schedules
        .register("dashboard-cleanup", "0 45 * * * *", move || {
            let dashboard = dashboard.clone();
            async move { dashboard.cleanup_expired().await.map(|_| ()) }
        })
        .await?;

    schedules.start().await
}
