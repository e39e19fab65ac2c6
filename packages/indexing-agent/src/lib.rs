//! Document indexing agent.
//!
//! Consumes "document discovered" events from a partitioned message stream and
//! writes each document into a tenant-scoped indexing backend, while capping the
//! number of expensive backend instances alive at once.
//!
//! # Architecture
//!
//! ```text
//! MessageSource (JetStream)
//!     │
//!     └─► IngestionLoop ── partitions hashed onto a fixed set of sequential lanes
//!             │
//!             ├─► DocumentPipeline.process(job)   (admission gate: max_workers)
//!             │       ├─► extract text (plain text or gzip+base64 HTML)
//!             │       ├─► TenantPool.get(tenant)  (LRU + TTL, max_instances)
//!             │       └─► handle.insert(url, text)
//!             │
//!             └─► commit record on success / malformed payload
//!
//! IdleReaper ── every interval ──► TenantPool.evict_expired(), stats report
//! ```
//!
//! # Modules
//!
//! - [`pool`] - Tenant resource pool with LRU and TTL eviction
//! - [`pipeline`] - Bounded-concurrency document pipeline
//! - [`consumer`] - Message sources and the ingestion loop
//! - [`reaper`] - Idle instance reaper
//! - [`backend`] - Backend instance traits and the HTTP backend
//! - [`extract`] - Text extraction helpers
//! - [`status`] - Job status reporting
//! - [`testing`] - Mock implementations for testing

pub mod backend;
pub mod config;
pub mod consumer;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod pool;
pub mod reaper;
pub mod service;
pub mod status;
pub mod testing;
pub mod types;

pub use backend::{BackendFactory, BackendHandle, BackendInstance, HttpBackendFactory};
pub use config::Config;
pub use consumer::{
    ConsumerConfig, IngestionLoop, JetStreamConfig, JetStreamSource, LoopStats, LoopStatsSnapshot,
    MessageSource, Record, RecordOutcome,
};
pub use error::{
    BackendError, ErrorKind, ExtractError, IngestError, ProcessingError, StatusError,
    TransportError,
};
pub use pipeline::{DocumentPipeline, PipelineConfig, PipelineStats};
pub use pool::{PoolConfig, PoolStats, PooledInstance, TenantPool};
pub use reaper::{AgentStats, IdleReaper, ReaperConfig};
pub use service::{Service, ServiceHost};
pub use status::{HttpStatusClient, JobStatus, NoopStatusReporter, StatusReporter};
pub use types::{IngestionJob, PageContent, ProcessingResult};
