//! Wire and result types.

pub mod job;
pub mod result;

pub use job::{IngestionJob, PageContent, ENCODING_GZIP_BASE64, ENCODING_PLAIN};
pub use result::ProcessingResult;
