use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::CacheLayer;
use crate::config::AppSettings;
use crate::db::{AnalysisRepository, ChunkRepository, JobRepository, PredictionRepository};
use crate::error::{AppError, AppResult};
use crate::middleware::{LoggingMiddleware, StageContext, StageMiddleware, TimingMiddleware, run_stage};
use crate::ml::{EnhancedFeatures, FeatureInput, FeatureStrategy, ScoringEngine, StandardFeatures};
use crate::models::{DocumentChunk, Job, JobStatus, NewChunk};
use crate::pdf::PdfProcessor;
use crate::queue::{TaskBroker, TaskEnvelope, TaskHandler, TaskKind};
use crate::storage::ObjectStorage;
use crate::analysis::{self, PageMap};

/// Progress tuple served by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub current: u32,
    pub total: u32,
    pub stage: String,
}

/// Orchestrates the processing pipeline of a job:
/// `pdf.validate` -> `pdf.chunk` -> per-chunk `analysis.chunk` ->
/// `analysis.aggregate`. Status writes are compare-and-set transitions so
/// concurrent workers cannot corrupt the state machine.
pub struct PipelineService {
    jobs: JobRepository,
    chunks: ChunkRepository,
    analyses: AnalysisRepository,
    predictions: PredictionRepository,
    broker: TaskBroker,
    storage: Arc<dyn ObjectStorage>,
    cache: CacheLayer,
    processor: PdfProcessor,
    scoring: Arc<ScoringEngine>,
    settings: AppSettings,
    middlewares: Vec<Box<dyn StageMiddleware>>,
}

impl PipelineService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: JobRepository,
        chunks: ChunkRepository,
        analyses: AnalysisRepository,
        predictions: PredictionRepository,
        broker: TaskBroker,
        storage: Arc<dyn ObjectStorage>,
        cache: CacheLayer,
        scoring: Arc<ScoringEngine>,
        settings: AppSettings,
    ) -> Self {
        let processor = PdfProcessor::new(
            settings.pdf.chunk_size,
            settings.pdf.chunk_overlap,
            settings.pdf.extractor_pool,
        );
        let middlewares: Vec<Box<dyn StageMiddleware>> =
            vec![Box::new(LoggingMiddleware), Box::new(TimingMiddleware::new())];
        Self {
            jobs,
            chunks,
            analyses,
            predictions,
            broker,
            storage,
            cache,
            processor,
            scoring,
            settings,
            middlewares,
        }
    }

    /// Kicks off processing of a freshly uploaded job:
    /// uploaded -> processing, then `pdf.validate` enters the queue.
    pub async fn start_job(&self, job_id: &Uuid) -> AppResult<()> {
        self.jobs
            .transition_status(job_id, JobStatus::Uploaded, JobStatus::Processing)
            .await?;
        self.publish_progress(job_id, 0, 0, "validating").await;

        let task = TaskEnvelope::new(
            TaskKind::PdfValidate,
            serde_json::json!({ "jobId": job_id.to_string() }),
        )
        .with_time_limits(
            self.settings.queue.upload_time_limit_secs,
            self.settings.queue.upload_time_limit_secs + 60,
        );
        self.broker.enqueue(&task).await
    }

    /// Explicit retry of a failed job. Requires the original object to
    /// still be reachable; restarts from `pdf.validate`.
    pub async fn retry_job(&self, job_id: &Uuid) -> AppResult<Job> {
        let job = self
            .jobs
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

        if !self.storage.exists(&job.storage_key()).await.map_err(AppError::from)? {
            return Err(AppError::Processing(
                "original document is no longer in storage; retry is not possible".to_string(),
            ));
        }

        let job = self.jobs.reset_for_retry(job_id).await?;
        self.start_job(job_id).await?;
        Ok(job)
    }

    /// Deletes a job: revokes outstanding tasks, removes every storage
    /// object under its prefix and all dependent rows.
    pub async fn delete_job(&self, job_id: &Uuid) -> AppResult<bool> {
        let Some(job) = self.jobs.get_by_id(job_id).await? else {
            return Ok(false);
        };

        self.broker.revoke_job(job_id).await?;
        let removed = crate::storage::delete_prefix(self.storage.as_ref(), &job.storage_prefix())
            .await
            .map_err(AppError::from)?;
        log::info!("Removed {} storage objects for job {}", removed, job_id);

        let deleted = self.jobs.delete_cascade(job_id).await?;
        self.cache.delete(&progress_key(job_id)).await;
        Ok(deleted)
    }

    pub async fn progress(&self, job_id: &Uuid) -> Option<JobProgress> {
        self.cache.get(&progress_key(job_id)).await
    }

    async fn publish_progress(&self, job_id: &Uuid, current: u32, total: u32, stage: &str) {
        let progress = JobProgress { current, total, stage: stage.to_string() };
        self.cache.set(&progress_key(job_id), &progress).await;
    }

    async fn fetch_job(&self, task: &TaskEnvelope) -> AppResult<Job> {
        let job_id = task
            .job_id()
            .ok_or_else(|| AppError::Validation("task payload is missing jobId".to_string()))?;
        self.jobs
            .get_by_id(&job_id)
            .await?
            .ok_or_else(|| AppError::TaskRevoked(format!("job {} no longer exists", job_id)))
    }

    async fn load_document(&self, job: &Job) -> AppResult<Bytes> {
        self.storage
            .get_bytes(&job.storage_key())
            .await
            .map_err(AppError::from)
    }

    /// Validation step: metadata is extracted and persisted, then
    /// `pdf.chunk` is enqueued. Re-delivery on a job already past
    /// `processing` is a no-op.
    async fn handle_validate(&self, job: &Job) -> AppResult<()> {
        match job.status() {
            Some(JobStatus::Processing) => {}
            _ => {
                log::info!("pdf.validate skipped for job {} in state {}", job.id, job.status);
                return Ok(());
            }
        }

        let bytes = self.load_document(job).await?;
        let metadata = self.processor.validate(
            &bytes,
            &job.filename,
            self.settings.pdf.max_size_bytes(),
        )?;

        self.jobs.set_page_count(&job.id, metadata.page_count as i32).await?;
        let mut config = job.parsed_config();
        config.total_pages = Some(metadata.page_count);
        self.jobs.update_config(&job.id, &config).await?;

        self.publish_progress(&job.id, 0, 0, "chunking").await;
        let task = TaskEnvelope::new(
            TaskKind::PdfChunk,
            serde_json::json!({ "jobId": job.id.to_string() }),
        )
        .with_time_limits(
            self.settings.queue.chunk_time_limit_secs,
            self.settings.queue.chunk_time_limit_secs + 60,
        );
        self.broker.enqueue(&task).await
    }

    /// Chunking step: streams extracted chunks and persists them in index
    /// order even when extraction completes out of order, enqueueing one
    /// `analysis.chunk` per chunk. Ends by moving the job to `analyzing`
    /// and enqueueing `analysis.aggregate`.
    async fn handle_chunk(&self, job: &Job, token: CancellationToken) -> AppResult<()> {
        match job.status() {
            Some(JobStatus::Processing) => {}
            _ => {
                log::info!("pdf.chunk skipped for job {} in state {}", job.id, job.status);
                return Ok(());
            }
        }

        let bytes = self.load_document(job).await?;
        let mut rx = self.processor.decompose(job.id, bytes, token.clone()).await?;

        let total = job
            .page_count
            .map(|pages| {
                crate::pdf::plan_chunks(
                    pages as u32,
                    self.settings.pdf.chunk_size,
                    self.settings.pdf.chunk_overlap,
                )
                .len() as u32
            })
            .unwrap_or(0);

        let mut pending = BTreeMap::new();
        let mut next_index: u32 = 0;
        while let Some(result) = rx.recv().await {
            let chunk = result?;
            pending.insert(chunk.chunk_index, chunk);

            // Persist the contiguous prefix in index order.
            while let Some(chunk) = pending.remove(&next_index) {
                self.chunks
                    .insert_many(&[NewChunk {
                        job_id: chunk.job_id,
                        chunk_index: chunk.chunk_index as i32,
                        page_start: chunk.page_start as i32,
                        page_end: chunk.page_end as i32,
                        raw_text: chunk.text,
                        cleaned_text: Some(chunk.cleaned_text),
                        images: chunk.images,
                    }])
                    .await?;

                let task = TaskEnvelope::new(
                    TaskKind::AnalysisChunk,
                    serde_json::json!({
                        "jobId": job.id.to_string(),
                        "chunkIndex": next_index,
                    }),
                )
                .with_time_limits(
                    self.settings.queue.analysis_time_limit_secs,
                    self.settings.queue.analysis_time_limit_secs + 60,
                );
                self.broker.enqueue(&task).await?;
                next_index += 1;
                self.publish_progress(&job.id, next_index, total, "chunking").await;
            }
        }

        if token.is_cancelled() {
            return Err(AppError::Cancelled("chunk extraction interrupted".to_string()));
        }
        if total > 0 && next_index < total {
            return Err(AppError::ExtractionFailed(format!(
                "only {} of {} chunks extracted",
                next_index, total
            )));
        }

        self.jobs
            .transition_status(&job.id, JobStatus::Processing, JobStatus::Analyzing)
            .await?;
        let task = TaskEnvelope::new(
            TaskKind::AnalysisAggregate,
            serde_json::json!({ "jobId": job.id.to_string() }),
        )
        .with_time_limits(
            self.settings.queue.analysis_time_limit_secs,
            self.settings.queue.analysis_time_limit_secs + 60,
        );
        self.broker.enqueue(&task).await
    }

    /// Per-chunk analysis: marks the chunk analyzed and advances the
    /// progress counter consumed by the status endpoint.
    async fn handle_analysis_chunk(&self, job: &Job, task: &TaskEnvelope) -> AppResult<()> {
        let chunk_index = task
            .payload
            .get("chunkIndex")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| AppError::Validation("task payload is missing chunkIndex".to_string()))?;

        self.chunks.mark_analyzed(&job.id, chunk_index as i32).await?;
        let analyzed = self.chunks.count_analyzed(&job.id).await? as u32;
        let total = self.chunks.count_for_job(&job.id).await? as u32;
        self.publish_progress(&job.id, analyzed, total, "analyzing").await;
        Ok(())
    }

    /// Aggregate step: rebuilds the page map from persisted chunks, runs
    /// the content analyzer, extracts features, scores the job and
    /// completes it.
    async fn handle_aggregate(&self, job: &Job) -> AppResult<()> {
        match job.status() {
            Some(JobStatus::Analyzing) => {}
            _ => {
                log::info!(
                    "analysis.aggregate skipped for job {} in state {}",
                    job.id,
                    job.status
                );
                return Ok(());
            }
        }

        let chunks = self.chunks.list_for_job(&job.id).await?;
        if chunks.is_empty() {
            return Err(AppError::Processing(format!("job {} has no chunks", job.id)));
        }

        let pages = pages_from_chunks(&chunks);
        let map = PageMap::new(&pages);

        let entities = analysis::extract_entities(&map);
        let keywords = analysis::extract_keywords(&map);
        let indicators = analysis::business_indicators(&map);
        let financial = analysis::financial_data(&entities);

        if let Err(e) = self
            .analyses
            .insert_text_analysis(
                &job.id,
                serde_json::to_value(&entities)?,
                serde_json::to_value(&keywords)?,
                indicators,
                financial,
            )
            .await
        {
            match e {
                // Idempotent re-delivery: the analysis already exists.
                AppError::AlreadyExists(_) => {
                    log::info!("Text analysis for job {} already persisted", job.id)
                }
                other => return Err(other),
            }
        }

        let points = analysis::analyze(&map, &job.filename);
        if self.analyses.points_for_job(&job.id).await?.is_empty() {
            self.analyses.insert_points(&job.id, &points).await?;
        }

        // Feature extraction: the enhanced strategy adds a rubric
        // assessment that the scoring engine blends in.
        let input = FeatureInput { text: &map.full_text, entities: &entities };
        let config = job.parsed_config();
        let (features, enhanced) = if config.enhanced_analysis {
            let strategy = EnhancedFeatures;
            let features = strategy.extract(&input);
            let assessment = strategy.assess(&input);
            (features, Some(assessment))
        } else {
            (StandardFeatures.extract(&input), None)
        };

        let prediction = self.scoring.score(&features, enhanced.as_ref());
        self.predictions.insert(&job.id, &prediction).await?;

        self.jobs
            .transition_status(&job.id, JobStatus::Analyzing, JobStatus::Completed)
            .await?;
        let total = chunks.len() as u32;
        self.publish_progress(&job.id, total, total, "completed").await;
        log::info!(
            "Job {} completed: score {:.1}, classification {}",
            job.id,
            prediction.lead_score,
            prediction.classification.as_str()
        );
        Ok(())
    }

    /// Marks the job failed when no further retry will be scheduled for
    /// this task.
    async fn fail_job_if_final(&self, task: &TaskEnvelope, error: &AppError) {
        let final_attempt = error.is_permanent() || task.attempt + 1 >= task.retry.max_attempts;
        if !final_attempt {
            return;
        }
        let Some(job_id) = task.job_id() else { return };
        let Ok(Some(job)) = self.jobs.get_by_id(&job_id).await else { return };
        let Some(status) = job.status() else { return };
        if matches!(status, JobStatus::Completed | JobStatus::Failed) {
            return;
        }

        if let Err(e) = self.jobs.mark_failed(&job_id, status, &error.to_string()).await {
            log::error!("Could not mark job {} failed: {}", job_id, e);
        }
        self.publish_progress(&job_id, 0, 0, "failed").await;
    }
}

fn progress_key(job_id: &Uuid) -> String {
    format!("progress:{}", job_id)
}

/// Rebuilds per-page texts from persisted chunk texts. Overlapping pages
/// appear in two chunks; the first occurrence wins so the output is
/// stable.
pub fn pages_from_chunks(chunks: &[DocumentChunk]) -> BTreeMap<u32, String> {
    static SEPARATOR: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(r"--- Page (\d+) ---\n?").expect("valid regex")
    });

    let mut pages = BTreeMap::new();
    for chunk in chunks {
        let mut current_page: Option<u32> = None;
        let mut last_end = 0;
        for captures in SEPARATOR.captures_iter(&chunk.raw_text) {
            let Some(whole) = captures.get(0) else { continue };
            if let Some(page) = current_page {
                let text = chunk.raw_text[last_end..whole.start()].trim_end_matches('\n');
                pages.entry(page).or_insert_with(|| text.to_string());
            }
            current_page = captures[1].parse::<u32>().ok();
            last_end = whole.end();
        }
        if let Some(page) = current_page {
            let text = chunk.raw_text[last_end..].trim_end_matches('\n');
            pages.entry(page).or_insert_with(|| text.to_string());
        }
    }
    pages
}

#[async_trait::async_trait]
impl TaskHandler for PipelineService {
    async fn handle(&self, task: &TaskEnvelope, token: CancellationToken) -> AppResult<()> {
        let job = self.fetch_job(task).await?;
        let ctx = StageContext {
            job_id: job.id,
            stage: task.kind.as_str(),
            attempt: task.attempt,
        };

        let result = run_stage(&self.middlewares, ctx, || async {
            match task.kind {
                TaskKind::PdfValidate => self.handle_validate(&job).await,
                TaskKind::PdfChunk => self.handle_chunk(&job, token.clone()).await,
                TaskKind::AnalysisChunk => self.handle_analysis_chunk(&job, task).await,
                TaskKind::AnalysisAggregate => self.handle_aggregate(&job).await,
                // Retraining is owned by the learning service; the router
                // never hands it here.
                TaskKind::MlRetrain => Err(AppError::Internal(
                    "ml.retrain routed to pipeline handler".to_string(),
                )),
            }
        })
        .await;

        if let Err(error) = &result {
            self.fail_job_if_final(task, error).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn chunk_with_text(index: i32, start: i32, end: i32, text: &str) -> DocumentChunk {
        DocumentChunk {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            chunk_index: index,
            page_start: start,
            page_end: end,
            raw_text: text.to_string(),
            cleaned_text: None,
            images: serde_json::json!([]),
            status: "extracted".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_pages_from_chunks_round_trip() {
        let chunks = vec![
            chunk_with_text(0, 1, 2, "--- Page 1 ---\nprimeira\n\n--- Page 2 ---\nsegunda"),
            chunk_with_text(1, 2, 3, "--- Page 2 ---\nsegunda\n\n--- Page 3 ---\nterceira"),
        ];
        let pages = pages_from_chunks(&chunks);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[&1], "primeira");
        assert_eq!(pages[&2], "segunda");
        assert_eq!(pages[&3], "terceira");
    }

    #[test]
    fn test_overlapping_page_first_occurrence_wins() {
        let chunks = vec![
            chunk_with_text(0, 1, 2, "--- Page 2 ---\noriginal"),
            chunk_with_text(1, 2, 3, "--- Page 2 ---\nduplicate"),
        ];
        let pages = pages_from_chunks(&chunks);
        assert_eq!(pages[&2], "original");
    }

    #[test]
    fn test_progress_key_shape() {
        let id = Uuid::nil();
        assert_eq!(progress_key(&id), format!("progress:{}", id));
    }
}
