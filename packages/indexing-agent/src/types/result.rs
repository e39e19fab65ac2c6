use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ProcessingError};
use crate::types::IngestionJob;

/// Outcome of processing one job. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub job_id: i64,
    pub tenant_id: String,
    pub url: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Characters of indexed text
    pub text_length: usize,
    pub processing_time_ms: u64,
}

impl ProcessingResult {
    pub fn succeeded(job: &IngestionJob, text_length: usize, processing_time_ms: u64) -> Self {
        Self {
            job_id: job.job_id,
            tenant_id: job.tenant_id.clone(),
            url: job.url.clone(),
            success: true,
            error_message: None,
            error_kind: None,
            text_length,
            processing_time_ms,
        }
    }

    pub fn failed(job: &IngestionJob, error: &ProcessingError, processing_time_ms: u64) -> Self {
        Self {
            job_id: job.job_id,
            tenant_id: job.tenant_id.clone(),
            url: job.url.clone(),
            success: false,
            error_message: Some(error.to_string()),
            error_kind: Some(error.kind()),
            text_length: 0,
            processing_time_ms,
        }
    }
}
