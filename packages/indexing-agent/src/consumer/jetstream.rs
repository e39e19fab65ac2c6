//! NATS JetStream message source.
//!
//! Uses a durable pull consumer with explicit acks. Each record's partition is
//! its subject (producers publish to `indexing.jobs.<tenant>`), and its offset
//! is the stream sequence. Unacked records are redelivered after `ack_wait`
//! or when the consumer reconnects.

use std::time::Duration;

use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy},
    stream,
};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::info;

use super::{Acknowledger, BoxError, MessageSource, Record};
use crate::error::TransportError;

/// JetStream connection and consumer settings.
#[derive(Debug, Clone)]
pub struct JetStreamConfig {
    pub url: String,
    pub stream: String,
    pub subject: String,
    /// Durable consumer name, shared by every replica of the agent
    pub consumer: String,
    pub ack_wait: Duration,
    pub max_ack_pending: i64,
}

impl Default for JetStreamConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream: "INDEXING_JOBS".to_string(),
            subject: "indexing.jobs.>".to_string(),
            consumer: "rag-processor".to_string(),
            ack_wait: Duration::from_secs(300),
            max_ack_pending: 1000,
        }
    }
}

struct JetStreamAck(jetstream::Message);

#[async_trait]
impl Acknowledger for JetStreamAck {
    async fn ack(&self) -> Result<(), BoxError> {
        // Wait for the server to confirm, so a commit is durable once it returns.
        self.0.double_ack().await
    }
}

/// Pull-consumer backed [`MessageSource`].
pub struct JetStreamSource {
    client: async_nats::Client,
    messages: pull::Stream,
}

impl JetStreamSource {
    /// Connect, ensure the stream and durable consumer exist, and start pulling.
    pub async fn connect(config: &JetStreamConfig) -> Result<Self, TransportError> {
        info!(
            url = %config.url,
            stream = %config.stream,
            subject = %config.subject,
            consumer = %config.consumer,
            "connecting to JetStream"
        );

        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(Box::new(e)))?;
        let context = jetstream::new(client.clone());

        let stream = context
            .get_or_create_stream(stream::Config {
                name: config.stream.clone(),
                subjects: vec![config.subject.clone()],
                ..Default::default()
            })
            .await
            .map_err(|e| TransportError::Connect(Box::new(e)))?;

        let consumer = stream
            .get_or_create_consumer(
                &config.consumer,
                pull::Config {
                    durable_name: Some(config.consumer.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: config.ack_wait,
                    max_ack_pending: config.max_ack_pending,
                    filter_subject: config.subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TransportError::Connect(Box::new(e)))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| TransportError::Connect(Box::new(e)))?;

        info!(consumer = %config.consumer, "JetStream consumer started");
        Ok(Self { client, messages })
    }
}

#[async_trait]
impl MessageSource for JetStreamSource {
    async fn next_record(&mut self) -> Result<Option<Record>, TransportError> {
        let message = match self.messages.next().await {
            None => return Ok(None),
            Some(Err(e)) => return Err(TransportError::Receive(Box::new(e))),
            Some(Ok(message)) => message,
        };

        let offset = message
            .info()
            .map(|info| info.stream_sequence)
            .map_err(TransportError::Receive)?;
        let partition = message.subject.to_string();
        let payload = message.payload.clone();

        Ok(Some(Record::new(
            partition,
            offset,
            payload,
            JetStreamAck(message),
        )))
    }

    /// Drain the connection: pending acks are flushed, then the client
    /// disconnects and the pull stream ends.
    async fn close(&mut self) -> Result<(), TransportError> {
        self.client
            .drain()
            .await
            .map_err(|e| TransportError::Close(Box::new(e)))?;
        info!("JetStream connection drained and closed");
        Ok(())
    }
}
