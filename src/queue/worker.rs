use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{TaskBroker, TaskEnvelope};
use crate::error::{AppError, AppResult};

/// Executes one leased work item. The token fires at the soft time limit;
/// handlers are expected to observe it and stop gracefully, persisting
/// partial progress where safe.
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &TaskEnvelope, token: CancellationToken) -> AppResult<()>;
}

/// Bounded pool of executors draining the broker. One tokio task per
/// executor; each runs lease -> handle -> ack/fail in a loop.
pub struct WorkerPool {
    broker: TaskBroker,
    handler: Arc<dyn TaskHandler>,
    concurrency: usize,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(broker: TaskBroker, handler: Arc<dyn TaskHandler>, concurrency: usize) -> Self {
        Self {
            broker,
            handler,
            concurrency,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawns the executors and the lease janitor. Returns immediately.
    pub fn start(&self) {
        for worker_id in 0..self.concurrency {
            let broker = self.broker.clone();
            let handler = self.handler.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                log::info!("Worker {} started", worker_id);
                run_worker(worker_id, broker, handler, shutdown).await;
                log::info!("Worker {} stopped", worker_id);
            });
        }

        let broker = self.broker.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        match broker.requeue_expired().await {
                            Ok(0) => {}
                            Ok(n) => log::warn!("Janitor requeued {} expired leases", n),
                            Err(e) => log::error!("Janitor sweep failed: {}", e),
                        }
                    }
                }
            }
        });
    }
}

async fn run_worker(
    worker_id: usize,
    broker: TaskBroker,
    handler: Arc<dyn TaskHandler>,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let task = match broker.lease().await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(500)) => continue,
                }
            }
            Err(e) => {
                log::error!("Worker {} lease failed: {}", worker_id, e);
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
        };

        let outcome = execute_with_limits(&task, handler.as_ref()).await;

        match outcome {
            Ok(()) => {
                if let Err(e) = broker.ack(&task.id).await {
                    // The lease stays; the janitor will hand the task back.
                    log::error!("Worker {} failed to ack task {}: {}", worker_id, task.id, e);
                }
            }
            Err(error) => {
                if let Err(e) = broker.fail(&task, &error).await {
                    log::error!("Worker {} failed to report task {}: {}", worker_id, task.id, e);
                }
            }
        }
    }
}

/// Runs a handler under its soft/hard time limits. The soft limit cancels
/// the token; the hard limit abandons the attempt entirely.
async fn execute_with_limits(task: &TaskEnvelope, handler: &dyn TaskHandler) -> AppResult<()> {
    let token = CancellationToken::new();

    let soft = token.clone();
    let soft_limit = task.soft_time_limit_secs;
    let soft_guard = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(soft_limit)).await;
        soft.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(task.hard_time_limit_secs),
        handler.handle(task, token.clone()),
    )
    .await;
    soft_guard.abort();

    match result {
        Ok(inner) => inner,
        Err(_) => Err(AppError::Timeout(format!(
            "task {} exceeded hard time limit of {}s",
            task.kind.as_str(),
            task.hard_time_limit_secs
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskKind;

    struct SlowHandler;

    #[async_trait::async_trait]
    impl TaskHandler for SlowHandler {
        async fn handle(&self, _task: &TaskEnvelope, token: CancellationToken) -> AppResult<()> {
            // Cooperative handler: stops as soon as the soft limit fires.
            token.cancelled().await;
            Err(AppError::Cancelled("soft limit reached".to_string()))
        }
    }

    struct StuckHandler;

    #[async_trait::async_trait]
    impl TaskHandler for StuckHandler {
        async fn handle(&self, _task: &TaskEnvelope, _token: CancellationToken) -> AppResult<()> {
            // Ignores cancellation entirely; only the hard limit stops it.
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_soft_limit_cancels_cooperative_handler() {
        let task = TaskEnvelope::new(TaskKind::PdfChunk, serde_json::json!({}))
            .with_time_limits(1, 10);
        let result = execute_with_limits(&task, &SlowHandler).await;
        assert!(matches!(result, Err(AppError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_hard_limit_terminates_stuck_handler() {
        let task = TaskEnvelope::new(TaskKind::PdfChunk, serde_json::json!({}))
            .with_time_limits(1, 2);
        let result = execute_with_limits(&task, &StuckHandler).await;
        assert!(matches!(result, Err(AppError::Timeout(_))));
    }
}
