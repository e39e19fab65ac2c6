use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::backend::HttpBackendConfig;
use crate::consumer::{ConsumerConfig, JetStreamConfig};
use crate::pipeline::PipelineConfig;
use crate::pool::PoolConfig;
use crate::reaper::ReaperConfig;
use crate::status::StatusClientConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Transport
    pub nats_url: String,
    pub stream: String,
    pub subject: String,
    pub consumer: String,
    pub ack_wait_secs: u64,
    pub max_ack_pending: i64,
    pub partition_buffer: usize,
    pub ingestion_lanes: usize,

    // Processing
    pub max_workers: usize,
    pub max_rag_instances: usize,
    pub rag_instance_ttl_secs: u64,
    pub rag_close_timeout_secs: u64,
    pub reaper_interval_secs: u64,

    // Backend
    pub lightrag_url: String,
    pub lightrag_api_key: Option<String>,
    pub lightrag_timeout_secs: u64,

    // Status reporting
    pub status_reporting_enabled: bool,
    pub go_backend_url: String,
    pub go_backend_timeout_secs: u64,
    pub internal_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let max_workers: usize = parse(&lookup, "MAX_WORKERS", 5)?;

        let config = Self {
            nats_url: var("NATS_URL", "nats://localhost:4222"),
            stream: var("INDEXING_STREAM", "INDEXING_JOBS"),
            subject: var("INDEXING_SUBJECT", "indexing.jobs.>"),
            consumer: var("INDEXING_CONSUMER", "rag-processor"),
            ack_wait_secs: parse(&lookup, "INDEXING_ACK_WAIT_SECS", 300)?,
            max_ack_pending: parse(&lookup, "INDEXING_MAX_ACK_PENDING", 1000)?,
            partition_buffer: parse(&lookup, "PARTITION_BUFFER", 16)?,
            ingestion_lanes: parse(&lookup, "INGESTION_LANES", max_workers)?,
            max_workers,
            max_rag_instances: parse(&lookup, "MAX_RAG_INSTANCES", 10)?,
            rag_instance_ttl_secs: parse(&lookup, "RAG_INSTANCE_TTL", 300)?,
            rag_close_timeout_secs: parse(&lookup, "RAG_CLOSE_TIMEOUT_SECS", 30)?,
            reaper_interval_secs: parse(&lookup, "RAG_REAPER_INTERVAL", 60)?,
            lightrag_url: var("LIGHTRAG_URL", "http://localhost:9621"),
            lightrag_api_key: lookup("LIGHTRAG_API_KEY").filter(|key| !key.is_empty()),
            lightrag_timeout_secs: parse(&lookup, "LIGHTRAG_TIMEOUT_SECS", 120)?,
            status_reporting_enabled: parse_bool(&lookup, "STATUS_REPORTING_ENABLED", false)?,
            go_backend_url: var("GO_BACKEND_URL", "http://localhost:8005"),
            go_backend_timeout_secs: parse(&lookup, "GO_BACKEND_TIMEOUT", 30)?,
            internal_api_key: lookup("INTERNAL_API_KEY").filter(|key| !key.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_workers < 1 {
            bail!("MAX_WORKERS must be at least 1");
        }
        if self.max_rag_instances < 1 {
            bail!("MAX_RAG_INSTANCES must be at least 1");
        }
        if self.ingestion_lanes < 1 {
            bail!("INGESTION_LANES must be at least 1");
        }
        if self.reaper_interval_secs == 0 {
            bail!("RAG_REAPER_INTERVAL must be greater than 0");
        }
        if self.max_workers > self.max_rag_instances {
            warn!(
                max_workers = self.max_workers,
                max_rag_instances = self.max_rag_instances,
                "MAX_WORKERS exceeds MAX_RAG_INSTANCES, workers may evict each other's instances"
            );
        }
        Ok(())
    }

    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            max_instances: self.max_rag_instances,
            ttl: Duration::from_secs(self.rag_instance_ttl_secs),
            close_timeout: Duration::from_secs(self.rag_close_timeout_secs),
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            max_workers: self.max_workers,
        }
    }

    pub fn consumer(&self) -> ConsumerConfig {
        ConsumerConfig {
            lanes: self.ingestion_lanes,
            partition_buffer: self.partition_buffer,
            ..Default::default()
        }
    }

    pub fn reaper(&self) -> ReaperConfig {
        ReaperConfig {
            interval: Duration::from_secs(self.reaper_interval_secs),
        }
    }

    pub fn jetstream(&self) -> JetStreamConfig {
        JetStreamConfig {
            url: self.nats_url.clone(),
            stream: self.stream.clone(),
            subject: self.subject.clone(),
            consumer: self.consumer.clone(),
            ack_wait: Duration::from_secs(self.ack_wait_secs),
            max_ack_pending: self.max_ack_pending,
        }
    }

    pub fn backend(&self) -> HttpBackendConfig {
        HttpBackendConfig {
            base_url: self.lightrag_url.clone(),
            api_key: self.lightrag_api_key.clone(),
            timeout: Duration::from_secs(self.lightrag_timeout_secs),
        }
    }

    pub fn status(&self) -> StatusClientConfig {
        StatusClientConfig {
            base_url: self.go_backend_url.clone(),
            timeout: Duration::from_secs(self.go_backend_timeout_secs),
            internal_api_key: self.internal_api_key.clone(),
        }
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            other => bail!("{} must be a boolean, got {:?}", key, other),
        },
        None => Ok(default),
    }
}
