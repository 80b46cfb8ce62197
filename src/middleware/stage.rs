use std::time::Instant;

use uuid::Uuid;

use crate::error::AppResult;

/// Typed context handed to stage hooks: which job, which stage, and how
/// the attempt went.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub job_id: Uuid,
    pub stage: &'static str,
    pub attempt: u32,
}

/// Before/after hooks wrapped around every orchestrator step. These
/// replace ad-hoc instrumentation inside the step bodies: the orchestrator
/// invokes the chain, stages stay pure.
pub trait StageMiddleware: Send + Sync {
    fn before(&self, _ctx: &StageContext) {}
    fn after(&self, _ctx: &StageContext, _elapsed_ms: u64, _outcome: Result<(), &str>) {}
}

/// Structured log lines per stage execution.
pub struct LoggingMiddleware;

impl StageMiddleware for LoggingMiddleware {
    fn before(&self, ctx: &StageContext) {
        log::info!("Stage {} starting for job {} (attempt {})", ctx.stage, ctx.job_id, ctx.attempt);
    }

    fn after(&self, ctx: &StageContext, elapsed_ms: u64, outcome: Result<(), &str>) {
        match outcome {
            Ok(()) => {
                log::info!("Stage {} completed for job {} in {}ms", ctx.stage, ctx.job_id, elapsed_ms)
            }
            Err(error) => log::warn!(
                "Stage {} failed for job {} after {}ms: {}",
                ctx.stage,
                ctx.job_id,
                elapsed_ms,
                error
            ),
        }
    }
}

/// Duration bookkeeping, queryable for slow-stage diagnostics.
pub struct TimingMiddleware {
    timings: dashmap::DashMap<&'static str, (u64, u64)>,
}

impl TimingMiddleware {
    pub fn new() -> Self {
        Self { timings: dashmap::DashMap::new() }
    }

    /// (executions, total milliseconds) per stage.
    pub fn snapshot(&self) -> Vec<(&'static str, u64, u64)> {
        self.timings
            .iter()
            .map(|entry| (*entry.key(), entry.value().0, entry.value().1))
            .collect()
    }
}

impl Default for TimingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl StageMiddleware for TimingMiddleware {
    fn after(&self, ctx: &StageContext, elapsed_ms: u64, _outcome: Result<(), &str>) {
        let mut entry = self.timings.entry(ctx.stage).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += elapsed_ms;
    }
}

/// Runs a stage body inside the middleware chain.
pub async fn run_stage<F, Fut>(
    middlewares: &[Box<dyn StageMiddleware>],
    ctx: StageContext,
    body: F,
) -> AppResult<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<()>>,
{
    for middleware in middlewares {
        middleware.before(&ctx);
    }
    let started = Instant::now();
    let result = body().await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let outcome = match &result {
        Ok(()) => Ok(()),
        Err(e) => Err(e.to_string()),
    };
    for middleware in middlewares {
        middleware.after(&ctx, elapsed_ms, outcome.as_ref().map(|_| ()).map_err(|s| s.as_str()));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_timing_middleware_accumulates() {
        let timing = TimingMiddleware::new();
        let ctx = StageContext { job_id: Uuid::new_v4(), stage: "pdf.validate", attempt: 0 };
        timing.after(&ctx, 12, Ok(()));
        timing.after(&ctx, 30, Ok(()));

        let snapshot = timing.snapshot();
        assert_eq!(snapshot, vec![("pdf.validate", 2, 42)]);
    }

    #[tokio::test]
    async fn test_run_stage_propagates_errors() {
        let middlewares: Vec<Box<dyn StageMiddleware>> = vec![Box::new(LoggingMiddleware)];
        let ctx = StageContext { job_id: Uuid::new_v4(), stage: "pdf.chunk", attempt: 1 };
        let result = run_stage(&middlewares, ctx, || async {
            Err(AppError::ExtractionFailed("boom".to_string()))
        })
        .await;
        assert!(matches!(result, Err(AppError::ExtractionFailed(_))));
    }
}
