//! Message consumption.
//!
//! A [`MessageSource`] yields [`Record`]s in partition order; the
//! [`IngestionLoop`] parses them, hands jobs to the document pipeline and
//! commits each record only after its outcome is known.

mod ingestion;
mod jetstream;

pub use ingestion::{ConsumerConfig, IngestionLoop, LoopStats, LoopStatsSnapshot, RecordOutcome};
pub use jetstream::{JetStreamConfig, JetStreamSource};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Acknowledges one delivered record with the transport.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BoxError>;
}

/// One delivered message.
///
/// Committing consumes the record, so a record can be committed at most once.
pub struct Record {
    /// Ordering scope: records of one partition are handled in order
    pub partition: String,
    /// Position within the partition
    pub offset: u64,
    pub payload: Bytes,
    acker: Box<dyn Acknowledger>,
}

impl Record {
    pub fn new(
        partition: impl Into<String>,
        offset: u64,
        payload: impl Into<Bytes>,
        acker: impl Acknowledger + 'static,
    ) -> Self {
        Self {
            partition: partition.into(),
            offset,
            payload: payload.into(),
            acker: Box::new(acker),
        }
    }

    /// Acknowledge this record so it is not redelivered.
    pub async fn commit(self) -> Result<(), TransportError> {
        let Record {
            partition,
            offset,
            acker,
            ..
        } = self;

        acker
            .ack()
            .await
            .map_err(|source| TransportError::Commit {
                partition,
                offset,
                source,
            })
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Ordered, partitioned, at-least-once message stream with manual commits.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next record. `Ok(None)` means the stream has ended.
    ///
    /// Must be cancel-safe: the loop races it against shutdown.
    async fn next_record(&mut self) -> Result<Option<Record>, TransportError>;

    /// Close the transport connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}
