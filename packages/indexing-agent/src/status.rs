//! Job status reporting to the crawler backend.
//!
//! Reporting is fire-and-forget: a failed status update is logged and never
//! changes a job's outcome or its acknowledgment.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StatusError;
use crate::types::ProcessingResult;

const INTERNAL_API_KEY_HEADER: &str = "X-Internal-API-Key";

/// Job status values understood by the status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Sink for job outcomes.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, request_id: i64, result: &ProcessingResult);
}

/// Reporter that drops every outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatusReporter;

#[async_trait]
impl StatusReporter for NoopStatusReporter {
    async fn report(&self, _request_id: i64, _result: &ProcessingResult) {}
}

/// Status API connection settings.
#[derive(Debug, Clone)]
pub struct StatusClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub internal_api_key: Option<String>,
}

#[derive(Serialize)]
struct JobStatusUpdate<'a> {
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_msg: Option<&'a str>,
}

#[derive(Serialize)]
struct RequestProgressUpdate {
    increment_completed_jobs: bool,
}

/// HTTP client for the crawler backend's status endpoints.
pub struct HttpStatusClient {
    client: reqwest::Client,
    base_url: String,
    internal_api_key: Option<String>,
}

impl HttpStatusClient {
    pub fn new(config: StatusClientConfig) -> Result<Self, StatusError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            internal_api_key: config.internal_api_key,
        })
    }

    fn put(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.put(format!("{}{}", self.base_url, path));
        if let Some(key) = &self.internal_api_key {
            builder = builder.header(INTERNAL_API_KEY_HEADER, key);
        }
        builder
    }

    async fn check(response: reqwest::Response) -> Result<(), StatusError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(StatusError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    /// Set a job's status.
    pub async fn update_job_status(
        &self,
        job_id: i64,
        status: JobStatus,
        error_msg: Option<&str>,
    ) -> Result<(), StatusError> {
        let response = self
            .put(&format!("/api/indexing/jobs/{}/status", job_id))
            .json(&JobStatusUpdate { status, error_msg })
            .send()
            .await?;

        Self::check(response).await?;
        debug!(job_id, status = ?status, "updated job status");
        Ok(())
    }

    /// Bump the completed-jobs counter of an indexing request.
    pub async fn increment_completed_jobs(&self, request_id: i64) -> Result<(), StatusError> {
        let response = self
            .put(&format!("/api/indexing/requests/{}/status", request_id))
            .json(&RequestProgressUpdate {
                increment_completed_jobs: true,
            })
            .send()
            .await?;

        Self::check(response).await?;
        debug!(request_id, "incremented completed jobs");
        Ok(())
    }

    /// Whether the status API answers its health check.
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "status API health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl StatusReporter for HttpStatusClient {
    async fn report(&self, request_id: i64, result: &ProcessingResult) {
        let (status, error_msg) = if result.success {
            (JobStatus::Completed, None)
        } else {
            (JobStatus::Failed, result.error_message.as_deref())
        };

        if let Err(e) = self.update_job_status(result.job_id, status, error_msg).await {
            warn!(job_id = result.job_id, error = %e, "failed to update job status");
            return;
        }

        if result.success {
            if let Err(e) = self.increment_completed_jobs(request_id).await {
                warn!(request_id, error = %e, "failed to increment completed jobs");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_update_body() {
        let body = serde_json::to_value(JobStatusUpdate {
            status: JobStatus::Failed,
            error_msg: Some("boom"),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"status": "failed", "error_msg": "boom"}));

        let body = serde_json::to_value(JobStatusUpdate {
            status: JobStatus::Completed,
            error_msg: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"status": "completed"}));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_swallowed() {
        let client = HttpStatusClient::new(StatusClientConfig {
            base_url: "http://127.0.0.1:9/".to_string(),
            timeout: Duration::from_millis(200),
            internal_api_key: Some("secret".to_string()),
        })
        .unwrap();

        let result = ProcessingResult {
            job_id: 1,
            tenant_id: "t1".into(),
            url: "https://x/doc".into(),
            success: true,
            error_message: None,
            error_kind: None,
            text_length: 5,
            processing_time_ms: 3,
        };

        client.report(1, &result).await;
        assert!(!client.health_check().await);
    }
}
