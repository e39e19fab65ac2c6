//! Text extraction for ingestion jobs.
//!
//! Pre-extracted text from the crawler wins; otherwise the encoded HTML is
//! decoded and cleaned.

mod html;

pub use html::{clean_to_plain_text, decompress, extract_title};

use tracing::debug;

use crate::error::ProcessingError;
use crate::types::IngestionJob;

/// Text and title pulled out of a job's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub text: String,
    /// Crawler-supplied title, else the HTML `<title>`
    pub title: Option<String>,
}

/// Produce the text to index for a job.
pub fn extract_text(job: &IngestionJob) -> Result<String, ProcessingError> {
    extract_document(job).map(|doc| doc.text)
}

/// Produce the text to index for a job, along with its title.
pub fn extract_document(job: &IngestionJob) -> Result<ExtractedDocument, ProcessingError> {
    let Some(content) = job.content.as_ref() else {
        return Err(ProcessingError::EmptyContent);
    };

    let given_title = Some(content.title.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    if content.has_text() {
        debug!(job_id = job.job_id, "using pre-extracted text");
        return Ok(ExtractedDocument {
            text: content.text.clone(),
            title: given_title,
        });
    }

    if content.has_html() {
        debug!(job_id = job.job_id, encoding = %content.encoding, "extracting text from HTML");
        let html = decompress(&content.html, &content.encoding)?;
        let text = clean_to_plain_text(&html);
        if !text.is_empty() {
            return Ok(ExtractedDocument {
                text,
                title: given_title.or_else(|| extract_title(&html)),
            });
        }
    }

    Err(ProcessingError::EmptyContent)
}
