use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_cron_scheduler::{Job, JobScheduler};

use crate::error::AppError;

/// Registers the periodic schedules at startup. Every schedule carries an
/// at-most-one-in-flight guard: a tick that finds the previous run still
/// active is skipped.
pub struct PeriodicSchedules {
    scheduler: JobScheduler,
}

impl PeriodicSchedules {
    pub async fn new() -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create scheduler: {}", e)))?;
        Ok(Self { scheduler })
    }

    /// Register a named cron schedule (6-field cron, seconds first).
    pub async fn register<F, Fut>(&self, name: &'static str, cron: &str, run: F) -> Result<(), AppError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let in_flight = Arc::new(AtomicBool::new(false));
        let run = Arc::new(run);

        let job = Job::new_async(cron, move |_uuid, _lock| {
            let in_flight = in_flight.clone();
            let run = run.clone();
            Box::pin(async move {
                if in_flight.swap(true, Ordering::SeqCst) {
                    log::warn!("Schedule '{}' still running; skipping this tick", name);
                    return;
                }
                log::info!("Schedule '{}' starting", name);
                match run().await {
                    Ok(()) => log::info!("Schedule '{}' completed", name),
                    Err(e) => log::error!("Schedule '{}' failed: {}", name, e),
                }
                in_flight.store(false, Ordering::SeqCst);
            })
        })
        .map_err(|e| AppError::Internal(format!("Invalid cron for '{}': {}", name, e)))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to add schedule '{}': {}", name, e)))?;
        log::info!("Registered schedule '{}' ({})", name, cron);
        Ok(())
    }

    pub async fn start(&self) -> Result<(), AppError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to start scheduler: {}", e)))
    }
}
