//! Indexing backend abstraction.
//!
//! A backend instance is an expensive, stateful engine scoped to one tenant.
//! Instances are created by a [`BackendFactory`] and owned by the
//! [`TenantPool`](crate::pool::TenantPool), which is the only component that
//! closes them. Handles handed out by the pool may be used by several
//! pipeline workers at once, so implementations must tolerate concurrent
//! `insert` calls.

mod http;

pub use http::{workspace_name, HttpBackend, HttpBackendConfig, HttpBackendFactory};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;

/// Shared handle to a tenant's backend instance.
pub type BackendHandle = Arc<dyn BackendInstance>;

/// A tenant-scoped indexing engine.
#[async_trait]
pub trait BackendInstance: Send + Sync {
    /// Tenant this instance is scoped to.
    fn tenant_id(&self) -> &str;

    /// Insert (or replace) a document.
    ///
    /// Inserting the same `doc_id` twice must leave one logical document.
    async fn insert(&self, doc_id: &str, text: &str) -> Result<(), BackendError>;

    /// Release the instance's resources. Best-effort.
    async fn close(&self) -> Result<(), BackendError>;
}

/// Constructs backend instances for tenants.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Build and initialize an instance whose data is only reachable
    /// through `tenant_id`.
    async fn create(&self, tenant_id: &str) -> Result<BackendHandle, BackendError>;
}
