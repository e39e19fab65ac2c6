//! LightRAG server backend over HTTP.
//!
//! Each tenant maps to a server-side workspace selected with the
//! `LIGHTRAG-WORKSPACE` header, so one tenant's handle can never read or
//! write another tenant's documents.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use super::{BackendFactory, BackendHandle, BackendInstance};
use crate::error::BackendError;

const WORKSPACE_HEADER: &str = "LIGHTRAG-WORKSPACE";
const API_KEY_HEADER: &str = "X-API-Key";

/// Connection settings for the LightRAG server.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9621".to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Workspace name for a tenant.
///
/// Graph storage rejects names starting with a digit or containing dashes,
/// and tenant ids are usually UUIDs.
pub fn workspace_name(tenant_id: &str) -> String {
    format!("ws_{}", tenant_id.replace('-', "_"))
}

#[derive(Serialize)]
struct InsertTextRequest<'a> {
    text: &'a str,
    file_source: &'a str,
}

/// Creates [`HttpBackend`] instances sharing one HTTP connection pool.
pub struct HttpBackendFactory {
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpBackendFactory {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl BackendFactory for HttpBackendFactory {
    async fn create(&self, tenant_id: &str) -> Result<BackendHandle, BackendError> {
        let backend = HttpBackend {
            client: self.client.clone(),
            base_url: self.config.base_url.trim_end_matches('/').to_string(),
            api_key: self.config.api_key.clone(),
            tenant_id: tenant_id.to_string(),
            workspace: workspace_name(tenant_id),
            closed: AtomicBool::new(false),
        };

        backend.probe().await?;

        info!(tenant_id = %tenant_id, workspace = %backend.workspace, "backend instance initialized");
        Ok(Arc::new(backend))
    }
}

/// Handle to one tenant's workspace on the LightRAG server.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    tenant_id: String,
    workspace: String,
    closed: AtomicBool,
}

impl HttpBackend {
    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header(WORKSPACE_HEADER, &self.workspace);

        if let Some(key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }

        builder
    }

    async fn probe(&self) -> Result<(), BackendError> {
        let response = self
            .request(reqwest::Method::GET, "/health")
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable(format!(
                "health check returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl BackendInstance for HttpBackend {
    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    async fn insert(&self, doc_id: &str, text: &str) -> Result<(), BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed {
                tenant_id: self.tenant_id.clone(),
            });
        }

        debug!(tenant_id = %self.tenant_id, doc_id = %doc_id, "inserting document");

        let response = self
            .request(reqwest::Method::POST, "/documents/text")
            .json(&InsertTextRequest {
                text,
                file_source: doc_id,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        // Server-side storages stay up; the handle just stops accepting writes.
        self.closed.store(true, Ordering::Release);
        debug!(tenant_id = %self.tenant_id, "backend instance closed");
        Ok(())
    }
}
