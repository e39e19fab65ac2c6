//! Document pipeline: extract → acquire tenant instance → insert.
//!
//! Every job passes through an admission gate of `max_workers` permits, so
//! the number of concurrent backend operations (and instance creations) is
//! bounded no matter how fast records arrive. Each step's failure becomes a
//! failed [`ProcessingResult`]; nothing here acknowledges messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::error::ProcessingError;
use crate::extract;
use crate::pool::TenantPool;
use crate::status::StatusReporter;
use crate::types::{IngestionJob, ProcessingResult};

/// Pipeline concurrency settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Admission gate size
    pub max_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_workers: 5 }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub active_workers: usize,
    /// Time spent in finished jobs, successful or not
    pub processing_time_ms: u64,
}

/// Processes ingestion jobs into tenant backends.
pub struct DocumentPipeline {
    pool: Arc<TenantPool>,
    reporter: Arc<dyn StatusReporter>,
    limiter: Semaphore,
    config: PipelineConfig,
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
    processing_time_ms: AtomicU64,
}

impl DocumentPipeline {
    pub fn new(
        pool: Arc<TenantPool>,
        reporter: Arc<dyn StatusReporter>,
        config: PipelineConfig,
    ) -> Self {
        let max_workers = config.max_workers.max(1);
        Self {
            pool,
            reporter,
            limiter: Semaphore::new(max_workers),
            config: PipelineConfig { max_workers },
            jobs_processed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            processing_time_ms: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &Arc<TenantPool> {
        &self.pool
    }

    /// Process one job. Suspends while all worker slots are taken.
    pub async fn process(&self, job: &IngestionJob) -> ProcessingResult {
        let permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                let err = ProcessingError::Internal("admission gate closed".to_string());
                return self.finish(job, Err(err), 0);
            }
        };

        let started = Instant::now();
        info!(job_id = job.job_id, tenant_id = %job.tenant_id, url = %job.url, "processing job");

        let outcome = self.index_document(job).await;
        drop(permit);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.finish(job, outcome, elapsed_ms)
    }

    async fn index_document(&self, job: &IngestionJob) -> Result<usize, ProcessingError> {
        // Fail fast before touching the pool.
        let extract::ExtractedDocument { text, title } = extract::extract_document(job)?;

        let handle = self
            .pool
            .get(&job.tenant_id)
            .await
            .map_err(|source| ProcessingError::ResourceUnavailable {
                tenant_id: job.tenant_id.clone(),
                source,
            })?;

        // The URL is the document id, so a redelivered job overwrites itself.
        debug!(
            job_id = job.job_id,
            doc_id = %job.url,
            title = title.as_deref().unwrap_or(""),
            "inserting document"
        );
        handle
            .insert(&job.url, &text)
            .await
            .map_err(|source| ProcessingError::BackendWrite {
                doc_id: job.url.clone(),
                source,
            })?;

        Ok(text.chars().count())
    }

    fn finish(
        &self,
        job: &IngestionJob,
        outcome: Result<usize, ProcessingError>,
        elapsed_ms: u64,
    ) -> ProcessingResult {
        self.processing_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        let result = match outcome {
            Ok(text_length) => {
                let total = self.jobs_processed.fetch_add(1, Ordering::Relaxed) + 1;
                info!(
                    job_id = job.job_id,
                    tenant_id = %job.tenant_id,
                    url = %job.url,
                    text_length,
                    processing_time_ms = elapsed_ms,
                    total_processed = total,
                    "job processed"
                );
                ProcessingResult::succeeded(job, text_length, elapsed_ms)
            }
            Err(e) => {
                let total = self.jobs_failed.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    job_id = job.job_id,
                    tenant_id = %job.tenant_id,
                    url = %job.url,
                    kind = %e.kind(),
                    error = %e,
                    total_failed = total,
                    "job failed"
                );
                ProcessingResult::failed(job, &e, elapsed_ms)
            }
        };

        self.report(job.request_id, &result);
        result
    }

    fn report(&self, request_id: i64, result: &ProcessingResult) {
        let reporter = self.reporter.clone();
        let result = result.clone();
        tokio::spawn(async move {
            reporter.report(request_id, &result).await;
        });
    }

    pub fn active_workers(&self) -> usize {
        self.config.max_workers - self.limiter.available_permits()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            jobs_processed: self.jobs_processed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            active_workers: self.active_workers(),
            processing_time_ms: self.processing_time_ms.load(Ordering::Relaxed),
        }
    }
}
