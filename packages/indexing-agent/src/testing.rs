//! Testing utilities including mock implementations.
//!
//! These let the pool, pipeline and ingestion loop be exercised without a
//! running broker or indexing server.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;

use crate::backend::{BackendFactory, BackendHandle, BackendInstance};
use crate::consumer::{Acknowledger, BoxError, MessageSource, Record};
use crate::error::{BackendError, TransportError};
use crate::status::StatusReporter;
use crate::types::{IngestionJob, ProcessingResult};

// ============================================================================
// Backend
// ============================================================================

#[derive(Default)]
struct MockBackendState {
    fail_create: RwLock<HashSet<String>>,
    fail_insert: RwLock<HashSet<String>>,
    fail_close: AtomicBool,
    create_delay: RwLock<Option<Duration>>,
    insert_delay: RwLock<Option<Duration>>,

    /// Creations per tenant
    creates: RwLock<HashMap<String, usize>>,
    /// Close attempts in order
    closed: RwLock<Vec<String>>,
    /// Stored documents per tenant, keyed by doc id
    documents: RwLock<HashMap<String, IndexMap<String, String>>>,
    /// Every insert call per tenant, including replacements
    inserts: RwLock<HashMap<String, usize>>,

    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// A mock backend factory.
///
/// Instances share the factory's state, so documents written through any
/// instance stay visible after it is evicted. The factory never keeps a
/// handle to the instances it creates.
#[derive(Clone, Default)]
pub struct MockBackendFactory {
    state: Arc<MockBackendState>,
}

impl MockBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create` fail for a tenant.
    pub fn fail_create_for(self, tenant_id: impl Into<String>) -> Self {
        self.state
            .fail_create
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tenant_id.into());
        self
    }

    /// Make `insert` fail for a tenant.
    pub fn fail_insert_for(self, tenant_id: impl Into<String>) -> Self {
        self.state
            .fail_insert
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tenant_id.into());
        self
    }

    /// Make every `close` return an error.
    pub fn fail_close(self) -> Self {
        self.state.fail_close.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_create_delay(self, delay: Duration) -> Self {
        *self
            .state
            .create_delay
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(delay);
        self
    }

    pub fn with_insert_delay(self, delay: Duration) -> Self {
        *self
            .state
            .insert_delay
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(delay);
        self
    }

    /// Let a tenant's inserts succeed again.
    pub fn recover_insert_for(&self, tenant_id: &str) {
        self.state
            .fail_insert
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(tenant_id);
    }

    // Assertions

    pub fn create_count(&self, tenant_id: &str) -> usize {
        self.state
            .creates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tenant_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_creates(&self) -> usize {
        self.state
            .creates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }

    /// Tenants whose instance was closed, in close order.
    pub fn closed_tenants(&self) -> Vec<String> {
        self.state
            .closed
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Stored `(doc_id, text)` pairs for a tenant, in first-insert order.
    pub fn documents(&self, tenant_id: &str) -> Vec<(String, String)> {
        self.state
            .documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tenant_id)
            .map(|docs| {
                docs.iter()
                    .map(|(id, text)| (id.clone(), text.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn insert_count(&self, tenant_id: &str) -> usize {
        self.state
            .inserts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tenant_id)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of inserts observed running at once.
    pub fn max_concurrent_inserts(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendFactory for MockBackendFactory {
    async fn create(&self, tenant_id: &str) -> Result<BackendHandle, BackendError> {
        let delay = *self
            .state
            .create_delay
            .read()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .state
            .fail_create
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(tenant_id);
        if failing {
            return Err(BackendError::Unavailable(format!(
                "mock backend unavailable for {}",
                tenant_id
            )));
        }

        *self
            .state
            .creates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(tenant_id.to_string())
            .or_insert(0) += 1;

        Ok(Arc::new(MockBackend {
            tenant_id: tenant_id.to_string(),
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Instance produced by [`MockBackendFactory`].
pub struct MockBackend {
    tenant_id: String,
    state: Arc<MockBackendState>,
    closed: AtomicBool,
}

#[async_trait]
impl BackendInstance for MockBackend {
    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    async fn insert(&self, doc_id: &str, text: &str) -> Result<(), BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed {
                tenant_id: self.tenant_id.clone(),
            });
        }

        let running = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *self
            .state
            .insert_delay
            .read()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        *self
            .state
            .inserts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(self.tenant_id.clone())
            .or_insert(0) += 1;

        let failing = self
            .state
            .fail_insert
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&self.tenant_id);

        let result = if failing {
            Err(BackendError::Rejected {
                status: 500,
                body: "mock insert failure".to_string(),
            })
        } else {
            self.state
                .documents
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .entry(self.tenant_id.clone())
                .or_default()
                .insert(doc_id.to_string(), text.to_string());
            Ok(())
        };

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.closed.store(true, Ordering::SeqCst);
        self.state
            .closed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(self.tenant_id.clone());

        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("mock close failure".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Status reporting
// ============================================================================

/// Reporter that records every outcome it receives.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    reports: Arc<RwLock<Vec<(i64, ProcessingResult)>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(i64, ProcessingResult)> {
        self.reports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Wait until at least `count` reports arrived or `timeout` passes.
    ///
    /// Reports are delivered from spawned tasks, so tests poll for them.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<(i64, ProcessingResult)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let reports = self.reports();
            if reports.len() >= count || tokio::time::Instant::now() >= deadline {
                return reports;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report(&self, request_id: i64, result: &ProcessingResult) {
        self.reports
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((request_id, result.clone()));
    }
}

// ============================================================================
// Message source
// ============================================================================

enum Scripted {
    Record {
        partition: String,
        offset: u64,
        payload: Bytes,
    },
    Error(String),
}

#[derive(Default)]
struct MemoryLog {
    commits: RwLock<Vec<(String, u64)>>,
    failing_partitions: RwLock<HashSet<String>>,
    closed: AtomicBool,
}

/// Inspects a [`MemorySource`] after it has been moved into a loop.
#[derive(Clone)]
pub struct MemorySourceHandle {
    log: Arc<MemoryLog>,
}

impl MemorySourceHandle {
    /// Committed `(partition, offset)` pairs, in commit order.
    pub fn commits(&self) -> Vec<(String, u64)> {
        self.log
            .commits
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn committed_offsets(&self, partition: &str) -> Vec<u64> {
        self.commits()
            .into_iter()
            .filter(|(p, _)| p == partition)
            .map(|(_, offset)| offset)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.log.closed.load(Ordering::SeqCst)
    }
}

struct MemoryAck {
    partition: String,
    offset: u64,
    log: Arc<MemoryLog>,
}

#[async_trait]
impl Acknowledger for MemoryAck {
    async fn ack(&self) -> Result<(), BoxError> {
        let failing = self
            .log
            .failing_partitions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&self.partition);
        if failing {
            return Err(format!("commit rejected for {}", self.partition).into());
        }

        self.log
            .commits
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((self.partition.clone(), self.offset));
        Ok(())
    }
}

/// A scripted, in-memory [`MessageSource`].
///
/// Offsets are assigned per partition starting at 1. Once the script is
/// exhausted the source ends, or stays open without yielding when built with
/// [`MemorySource::hold_open`].
#[derive(Default)]
pub struct MemorySource {
    script: VecDeque<Scripted>,
    next_offsets: HashMap<String, u64>,
    hold_open: bool,
    log: Arc<MemoryLog>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> MemorySourceHandle {
        MemorySourceHandle {
            log: self.log.clone(),
        }
    }

    pub fn with_payload(mut self, partition: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        let partition = partition.into();
        let offset = self.next_offsets.entry(partition.clone()).or_insert(0);
        *offset += 1;
        self.script.push_back(Scripted::Record {
            partition,
            offset: *offset,
            payload: payload.into(),
        });
        self
    }

    pub fn with_job(self, partition: impl Into<String>, job: &IngestionJob) -> Self {
        let payload = job.to_payload().expect("job serializes to JSON");
        self.with_payload(partition, payload)
    }

    /// Yield a transport error at this point of the script.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.script.push_back(Scripted::Error(message.into()));
        self
    }

    /// Reject commits for a partition.
    pub fn fail_commits_for(self, partition: impl Into<String>) -> Self {
        self.log
            .failing_partitions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(partition.into());
        self
    }

    /// Keep the source open after the script runs out.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn next_record(&mut self) -> Result<Option<Record>, TransportError> {
        match self.script.pop_front() {
            Some(Scripted::Record {
                partition,
                offset,
                payload,
            }) => {
                let ack = MemoryAck {
                    partition: partition.clone(),
                    offset,
                    log: self.log.clone(),
                };
                Ok(Some(Record::new(partition, offset, payload, ack)))
            }
            Some(Scripted::Error(message)) => Err(TransportError::Receive(message.into())),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.log.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
