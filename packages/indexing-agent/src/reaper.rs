//! Periodic eviction of idle backend instances.
//!
//! Each sweep also logs a stats report for the pool and, when attached, the
//! pipeline and ingestion loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::consumer::{LoopStats, LoopStatsSnapshot};
use crate::pipeline::{DocumentPipeline, PipelineStats};
use crate::pool::{PoolStats, TenantPool};
use crate::service::Service;

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Time between sweeps
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Counters across the agent at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStats {
    pub pool: PoolStats,
    pub pipeline: Option<PipelineStats>,
    pub ingestion: Option<LoopStatsSnapshot>,
}

/// Calls [`TenantPool::evict_expired`] on a fixed interval.
///
/// A sweep holds the pool guard for its whole duration, so stopping the
/// reaper never leaves the pool half-swept.
pub struct IdleReaper {
    pool: Arc<TenantPool>,
    config: ReaperConfig,
    pipeline: Option<Arc<DocumentPipeline>>,
    loop_stats: Option<Arc<LoopStats>>,
}

impl IdleReaper {
    pub fn new(pool: Arc<TenantPool>, config: ReaperConfig) -> Self {
        Self {
            pool,
            config,
            pipeline: None,
            loop_stats: None,
        }
    }

    /// Include pipeline counters in each report.
    pub fn with_pipeline(mut self, pipeline: Arc<DocumentPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Include ingestion loop counters in each report.
    pub fn with_loop_stats(mut self, stats: Arc<LoopStats>) -> Self {
        self.loop_stats = Some(stats);
        self
    }

    /// Run one sweep now.
    pub async fn sweep(&self) -> usize {
        let evicted = self.pool.evict_expired().await;
        if evicted > 0 {
            info!(evicted, "cleaned up expired backend instances");
        } else {
            debug!("no expired backend instances");
        }
        evicted
    }

    pub async fn stats(&self) -> AgentStats {
        AgentStats {
            pool: self.pool.stats().await,
            pipeline: self.pipeline.as_ref().map(|pipeline| pipeline.stats()),
            ingestion: self.loop_stats.as_ref().map(|stats| stats.snapshot()),
        }
    }

    /// Log the current stats as one structured event.
    pub async fn report(&self) -> AgentStats {
        let stats = self.stats().await;
        let pipeline = stats.pipeline.unwrap_or_default();
        let ingestion = stats.ingestion.unwrap_or_default();

        info!(
            active_instances = stats.pool.active_instances,
            max_instances = stats.pool.max_instances,
            jobs_processed = pipeline.jobs_processed,
            jobs_failed = pipeline.jobs_failed,
            active_workers = pipeline.active_workers,
            processing_time_ms = pipeline.processing_time_ms,
            received = ingestion.received,
            committed = ingestion.committed,
            skipped = ingestion.skipped,
            failed = ingestion.failed,
            "indexing agent stats"
        );

        stats
    }
}

#[async_trait]
impl Service for IdleReaper {
    fn name(&self) -> &'static str {
        "idle-reaper"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(interval_secs = self.config.interval.as_secs(), "idle reaper starting");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {
                    self.sweep().await;
                    self.report().await;
                }
            }
        }

        info!("idle reaper stopped");
        Ok(())
    }
}
