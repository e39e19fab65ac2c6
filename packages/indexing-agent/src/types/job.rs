//! Ingestion job messages published by the crawler.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProcessingError;

/// HTML is gzip-compressed, then base64-encoded.
pub const ENCODING_GZIP_BASE64: &str = "gzip+base64";
/// HTML is sent as-is.
pub const ENCODING_PLAIN: &str = "plain";

/// Content captured for a crawled page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    /// Encoded HTML (see `encoding`)
    #[serde(default)]
    pub html: String,

    /// Pre-extracted plain text
    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub title: String,

    #[serde(default = "default_content_type")]
    pub content_type: String,

    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Original HTML size in bytes
    #[serde(default)]
    pub html_size: u64,
}

fn default_content_type() -> String {
    "text/html".to_string()
}

fn default_encoding() -> String {
    ENCODING_GZIP_BASE64.to_string()
}

impl Default for PageContent {
    fn default() -> Self {
        Self {
            html: String::new(),
            text: String::new(),
            title: String::new(),
            content_type: default_content_type(),
            encoding: default_encoding(),
            html_size: 0,
        }
    }
}

impl PageContent {
    /// Content with pre-extracted text only.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Content with encoded HTML only.
    pub fn from_html(html: impl Into<String>, encoding: impl Into<String>) -> Self {
        let html = html.into();
        Self {
            html_size: html.len() as u64,
            html,
            encoding: encoding.into(),
            ..Default::default()
        }
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn has_html(&self) -> bool {
        !self.html.trim().is_empty()
    }
}

/// A discovered document to index. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub job_id: i64,
    pub request_id: i64,
    #[serde(default)]
    pub project_id: i64,
    #[serde(default)]
    pub user_id: String,

    /// Isolation boundary; older producers call it `collection_id`
    #[serde(alias = "collection_id")]
    pub tenant_id: String,

    pub url: String,
    #[serde(default)]
    pub depth: i32,
    #[serde(default)]
    pub parent_url: String,

    #[serde(default)]
    pub content: Option<PageContent>,

    #[serde(default = "Utc::now")]
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl IngestionJob {
    /// Create a job with the fields the pipeline needs.
    pub fn new(job_id: i64, tenant_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            job_id,
            request_id: 0,
            project_id: 0,
            user_id: String::new(),
            tenant_id: tenant_id.into(),
            url: url.into(),
            depth: 0,
            parent_url: String::new(),
            content: None,
            discovered_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: i64) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_content(mut self, content: PageContent) -> Self {
        self.content = Some(content);
        self
    }

    /// Parse a wire payload.
    ///
    /// Anything that can never succeed on redelivery (bad JSON, missing
    /// fields, blank tenant or URL) is a `MalformedMessage`.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProcessingError> {
        let job: IngestionJob = serde_json::from_slice(payload)?;

        if job.tenant_id.trim().is_empty() {
            return Err(ProcessingError::MalformedMessage {
                reason: format!("job {} has a blank tenant_id", job.job_id),
            });
        }
        if job.url.trim().is_empty() {
            return Err(ProcessingError::MalformedMessage {
                reason: format!("job {} has a blank url", job.job_id),
            });
        }

        Ok(job)
    }

    /// Serialize to the wire format.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
