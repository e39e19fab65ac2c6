//! The ingestion loop.
//!
//! # Architecture
//!
//! ```text
//! IngestionLoop
//!     │
//!     ├─► source.next_record()
//!     └─► route to lane hash(partition) % lanes (spawned on first use)
//!
//! lane (sequential, serves a fixed subset of partitions)
//!     │
//!     ├─► parse payload ── malformed ──► commit (skip)
//!     ├─► pipeline.process(job)
//!     ├─► success ──► commit
//!     └─► failure ──► leave uncommitted for redelivery
//! ```
//!
//! A partition always maps to the same lane, so commits stay in consumption
//! order within a partition while lanes proceed concurrently. The number of
//! lanes is fixed, so tenants never seen again leave nothing behind; the
//! pipeline's admission gate still caps the total number of jobs in flight.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{MessageSource, Record};
use crate::error::IngestError;
use crate::pipeline::DocumentPipeline;
use crate::service::Service;
use crate::types::IngestionJob;

/// Configuration for the ingestion loop.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Sequential lanes partitions are spread over
    pub lanes: usize,
    /// Records queued per lane before the loop stops pulling
    pub partition_buffer: usize,
    /// Identifier for this consumer instance in logs
    pub consumer_id: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            lanes: 5,
            partition_buffer: 16,
            consumer_id: format!("indexer-{}", Uuid::new_v4()),
        }
    }
}

/// Terminal state of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Pipeline succeeded; committed
    Succeeded,
    /// Pipeline failed; left for redelivery
    Failed,
    /// Payload was malformed; committed without processing
    Skipped,
}

impl RecordOutcome {
    pub fn should_commit(&self) -> bool {
        matches!(self, RecordOutcome::Succeeded | RecordOutcome::Skipped)
    }
}

/// Counters for the loop, shared with its lanes.
#[derive(Debug, Default)]
pub struct LoopStats {
    received: AtomicU64,
    committed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    lanes_started: AtomicU64,
}

impl LoopStats {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn lanes_started(&self) -> u64 {
        self.lanes_started.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> LoopStatsSnapshot {
        LoopStatsSnapshot {
            received: self.received(),
            committed: self.committed(),
            skipped: self.skipped(),
            failed: self.failed(),
            lanes_started: self.lanes_started(),
        }
    }
}

/// Point-in-time copy of [`LoopStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopStatsSnapshot {
    pub received: u64,
    pub committed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub lanes_started: u64,
}

/// Lane serving a partition. Stable for the life of the process.
fn lane_index(partition: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    partition.hash(&mut hasher);
    (hasher.finish() % lanes.max(1) as u64) as usize
}

/// Consumes a [`MessageSource`] into the [`DocumentPipeline`].
pub struct IngestionLoop<S: MessageSource> {
    source: S,
    pipeline: Arc<DocumentPipeline>,
    config: ConsumerConfig,
    stats: Arc<LoopStats>,
    stop: CancellationToken,
}

impl<S: MessageSource + 'static> IngestionLoop<S> {
    pub fn new(source: S, pipeline: Arc<DocumentPipeline>, config: ConsumerConfig) -> Self {
        Self {
            source,
            pipeline,
            config,
            stats: Arc::new(LoopStats::default()),
            stop: CancellationToken::new(),
        }
    }

    pub fn stats(&self) -> Arc<LoopStats> {
        self.stats.clone()
    }

    /// Token that stops the loop when cancelled. In-flight jobs still
    /// finish; take it before calling `run`, which consumes the loop.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Run until stopped, the source ends, or the transport fails.
    ///
    /// Returns only after every dispatched job has resolved and the
    /// transport has been closed.
    pub async fn run(mut self) -> Result<(), IngestError> {
        info!(consumer_id = %self.config.consumer_id, "starting message consumption loop");

        // Cancelled by the stop handle or by a lane that hit a transport error.
        let halt = self.stop.child_token();
        let lane_count = self.config.lanes.max(1);
        let mut lanes: Vec<Option<mpsc::Sender<Record>>> = vec![None; lane_count];
        let mut tasks: JoinSet<Result<(), IngestError>> = JoinSet::new();
        let mut fatal: Option<IngestError> = None;

        loop {
            tokio::select! {
                biased;
                _ = halt.cancelled() => {
                    info!("stop requested, no longer accepting records");
                    break;
                }
                next = self.source.next_record() => match next {
                    Ok(Some(record)) => {
                        self.stats.received.fetch_add(1, Ordering::Relaxed);

                        let index = lane_index(&record.partition, lane_count);
                        let sender = lanes[index]
                            .get_or_insert_with(|| {
                                let (tx, rx) = mpsc::channel(self.config.partition_buffer.max(1));
                                self.stats.lanes_started.fetch_add(1, Ordering::Relaxed);
                                tasks.spawn(run_lane(
                                    index,
                                    rx,
                                    self.pipeline.clone(),
                                    self.stats.clone(),
                                    halt.clone(),
                                ));
                                tx
                            })
                            .clone();

                        tokio::select! {
                            biased;
                            _ = halt.cancelled() => {
                                info!("stop requested, no longer accepting records");
                                break;
                            }
                            sent = sender.send(record) => {
                                if let Err(e) = sent {
                                    warn!(partition = %e.0.partition, offset = e.0.offset, lane = index, "lane gone, record left uncommitted");
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        info!("message source ended");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "transport error, stopping consumption");
                        fatal = Some(e.into());
                        halt.cancel();
                        break;
                    }
                }
            }
        }

        // Closing the senders lets each lane finish its queue and exit.
        drop(lanes);
        if !tasks.is_empty() {
            info!(lanes = tasks.len(), "waiting for in-flight jobs to complete");
        }
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(IngestError::LaneCrashed(e.to_string())),
            };
            if let Err(e) = outcome {
                error!(error = %e, "lane failed");
                fatal.get_or_insert(e);
            }
        }

        if let Err(e) = self.source.close().await {
            error!(error = %e, "failed to close message source");
            fatal.get_or_insert(e.into());
        }

        info!(
            consumer_id = %self.config.consumer_id,
            received = self.stats.received(),
            committed = self.stats.committed(),
            skipped = self.stats.skipped(),
            failed = self.stats.failed(),
            "message consumption loop stopped"
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Process one lane's records in order.
async fn run_lane(
    lane: usize,
    mut records: mpsc::Receiver<Record>,
    pipeline: Arc<DocumentPipeline>,
    stats: Arc<LoopStats>,
    halt: CancellationToken,
) -> Result<(), IngestError> {
    debug!(lane, "lane started");

    while let Some(record) = records.recv().await {
        if halt.is_cancelled() {
            debug!(partition = %record.partition, offset = record.offset, "not dispatched before shutdown, left uncommitted");
            continue;
        }

        let partition = record.partition.clone();
        let offset = record.offset;
        let outcome = dispatch(&pipeline, &stats, &record).await;

        if !outcome.should_commit() {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(partition = %partition, offset, "job failed, record left for redelivery");
            continue;
        }

        if let Err(e) = record.commit().await {
            error!(partition = %partition, offset, error = %e, "failed to commit record");
            halt.cancel();
            return Err(e.into());
        }

        stats.committed.fetch_add(1, Ordering::Relaxed);
        debug!(partition = %partition, offset, outcome = ?outcome, "committed offset");
    }

    debug!(lane, "lane stopped");
    Ok(())
}

/// Parse and process one record. Never commits.
async fn dispatch(
    pipeline: &Arc<DocumentPipeline>,
    stats: &LoopStats,
    record: &Record,
) -> RecordOutcome {
    let job = match IngestionJob::from_payload(&record.payload) {
        Ok(job) => job,
        Err(e) => {
            stats.skipped.fetch_add(1, Ordering::Relaxed);
            error!(
                partition = %record.partition,
                offset = record.offset,
                error = %e,
                "failed to decode message, skipping"
            );
            return RecordOutcome::Skipped;
        }
    };

    info!(
        job_id = job.job_id,
        tenant_id = %job.tenant_id,
        url = %job.url,
        partition = %record.partition,
        offset = record.offset,
        "received indexing job"
    );

    // A panic inside the pipeline fails this record, not the lane.
    let pipeline = pipeline.clone();
    match tokio::spawn(async move { pipeline.process(&job).await }).await {
        Ok(result) if result.success => RecordOutcome::Succeeded,
        Ok(_) => RecordOutcome::Failed,
        Err(e) => {
            error!(
                partition = %record.partition,
                offset = record.offset,
                error = %e,
                "pipeline task aborted"
            );
            RecordOutcome::Failed
        }
    }
}

#[async_trait]
impl<S: MessageSource + 'static> Service for IngestionLoop<S> {
    fn name(&self) -> &'static str {
        "ingestion-loop"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let stop = self.stop_handle();
        let link = tokio::spawn(async move {
            shutdown.cancelled().await;
            stop.cancel();
        });

        let result = IngestionLoop::run(*self).await;
        link.abort();
        result.map_err(Into::into)
    }
}
