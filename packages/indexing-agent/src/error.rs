//! Typed errors for the indexing agent.
//!
//! Per-job failures ([`ProcessingError`]) never escape the pipeline: they are
//! folded into a failed `ProcessingResult`. Only [`TransportError`] is allowed
//! to stop the ingestion loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of a failed job, carried on `ProcessingResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Payload could not be parsed; skipped and committed
    MalformedMessage,
    /// Job carried no usable text
    EmptyContent,
    /// HTML could not be decoded
    Extraction,
    /// Backend instance could not be obtained for the tenant
    ResourceUnavailable,
    /// Backend insert failed
    BackendWrite,
    /// Unexpected failure inside the worker (panic, closed gate)
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedMessage => "malformed_message",
            ErrorKind::EmptyContent => "empty_content",
            ErrorKind::Extraction => "extraction",
            ErrorKind::ResourceUnavailable => "resource_unavailable",
            ErrorKind::BackendWrite => "backend_write",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while processing a single job.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Payload is not a valid ingestion job
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// Neither pre-extracted text nor HTML yielded any text
    #[error("no text content extracted from document")]
    EmptyContent,

    /// HTML payload could not be decoded
    #[error("text extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    /// The pool could not provide a backend instance
    #[error("backend unavailable for tenant {tenant_id}: {source}")]
    ResourceUnavailable {
        tenant_id: String,
        #[source]
        source: BackendError,
    },

    /// The backend rejected or failed the insert
    #[error("backend write failed for {doc_id}: {source}")]
    BackendWrite {
        doc_id: String,
        #[source]
        source: BackendError,
    },

    /// Worker-level failure unrelated to the document
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProcessingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::MalformedMessage { .. } => ErrorKind::MalformedMessage,
            ProcessingError::EmptyContent => ErrorKind::EmptyContent,
            ProcessingError::Extraction(_) => ErrorKind::Extraction,
            ProcessingError::ResourceUnavailable { .. } => ErrorKind::ResourceUnavailable,
            ProcessingError::BackendWrite { .. } => ErrorKind::BackendWrite,
            ProcessingError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for ProcessingError {
    fn from(err: serde_json::Error) -> Self {
        ProcessingError::MalformedMessage {
            reason: err.to_string(),
        }
    }
}

/// Errors from decoding document content.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Content encoding is not supported
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    /// Base64 layer is corrupt
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Gzip layer is corrupt or not UTF-8
    #[error("failed to decompress HTML: {0}")]
    Decompress(#[source] std::io::Error),
}

/// Errors from a backend instance or its factory.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("backend returned {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Instance could not be constructed
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Handle was used after the pool closed it
    #[error("backend instance for {tenant_id} is closed")]
    Closed { tenant_id: String },

    /// Close did not finish in time
    #[error("close timed out after {secs}s")]
    CloseTimeout { secs: u64 },
}

/// Errors from the message transport. Fatal to the ingestion loop.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not connect or set up the consumer
    #[error("transport connect failed: {0}")]
    Connect(#[source] BoxError),

    /// Receiving the next record failed
    #[error("transport receive failed: {0}")]
    Receive(#[source] BoxError),

    /// Acknowledging a record failed
    #[error("commit failed for {partition}@{offset}: {source}")]
    Commit {
        partition: String,
        offset: u64,
        #[source]
        source: BoxError,
    },

    /// Closing the connection failed
    #[error("transport close failed: {0}")]
    Close(#[source] BoxError),
}

/// Errors that terminate the ingestion loop.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An ingestion lane stopped unexpectedly
    #[error("ingestion lane crashed: {0}")]
    LaneCrashed(String),
}

/// Errors from the status API client.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("status API returned {status}: {body}")]
    Rejected { status: u16, body: String },
}
