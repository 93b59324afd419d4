use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use thiserror::Error;
use tracing::{debug, error};

use crate::message::SinkMessage;
use crate::metrics_consts::DEAD_LETTER_PUBLISH_DURATION_MS;
use crate::topic::NamespaceTopics;

pub const ERROR_HEADER: &str = "error";

#[derive(Error, Debug)]
pub enum DeadLetterError {
    #[error("failed to publish {key} to {topic}: {source}")]
    Publish {
        topic: String,
        key: String,
        #[source]
        source: KafkaError,
    },
    #[error("message {0} has no namespace to route its dead letter")]
    MissingNamespace(String),
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Publish every message, failing if any one of them could not be written.
    async fn publish(&self, messages: &[SinkMessage]) -> Result<(), DeadLetterError>;
}

/// Original headers plus an `error` header holding the processing failure
pub fn dead_letter_headers(msg: &SinkMessage) -> OwnedHeaders {
    let reason = msg
        .error
        .as_ref()
        .map(|e| e.message.as_str())
        .unwrap_or_default();

    msg.headers()
        .cloned()
        .unwrap_or_else(OwnedHeaders::new)
        .insert(Header {
            key: ERROR_HEADER,
            value: Some(reason),
        })
}

/// The original key, payload and timestamp, addressed to `topic`
pub fn dead_letter_record<'a>(
    msg: &'a SinkMessage,
    topic: &'a str,
) -> FutureRecord<'a, [u8], [u8]> {
    let mut record = FutureRecord::to(topic).headers(dead_letter_headers(msg));
    if let Some(key) = msg.key() {
        record = record.key(key);
    }
    if let Some(payload) = msg.payload() {
        record = record.payload(payload);
    }
    if let Some(ts) = msg.timestamp() {
        record = record.timestamp(ts);
    }
    record
}

pub struct KafkaDeadLetterProducer {
    producer: FutureProducer,
    topics: NamespaceTopics,
    timeout: Duration,
}

impl KafkaDeadLetterProducer {
    pub fn new(producer: FutureProducer, topics: NamespaceTopics, timeout: Duration) -> Self {
        Self {
            producer,
            topics,
            timeout,
        }
    }

    async fn publish_one(&self, msg: &SinkMessage) -> Result<(), DeadLetterError> {
        let namespace = msg
            .namespace
            .as_deref()
            .ok_or_else(|| DeadLetterError::MissingNamespace(msg.physical_key()))?;
        let topic = self.topics.dead_letter_topic(namespace);
        let record = dead_letter_record(msg, &topic);

        let send_start = Instant::now();
        let result = self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await;
        metrics::histogram!(DEAD_LETTER_PUBLISH_DURATION_MS)
            .record(send_start.elapsed().as_millis() as f64);

        match result {
            Ok((partition, offset)) => {
                debug!(
                    topic = %topic,
                    partition,
                    offset,
                    source = %msg.physical_key(),
                    "Published dead letter"
                );
                Ok(())
            }
            Err((e, _)) => {
                error!(
                    topic = %topic,
                    source = %msg.physical_key(),
                    error = ?e,
                    "Failed to publish dead letter"
                );
                Err(DeadLetterError::Publish {
                    topic,
                    key: msg.physical_key(),
                    source: e,
                })
            }
        }
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterProducer {
    async fn publish(&self, messages: &[SinkMessage]) -> Result<(), DeadLetterError> {
        let results = join_all(messages.iter().map(|m| self.publish_one(m))).await;
        results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use rdkafka::message::Headers;

    use super::*;
    use crate::error::ProcessingError;
    use crate::message::Partition;

    #[test]
    fn test_error_header_is_appended_to_original_headers() {
        let mut msg = SinkMessage::new(Partition::new("om_default_events", 0), 1, None);
        msg.set_error(ProcessingError::dead_letter("value cannot be null"));

        let headers = dead_letter_headers(&msg);

        assert_eq!(headers.count(), 1);
        let header = headers.get(0);
        assert_eq!(header.key, ERROR_HEADER);
        assert_eq!(header.value, Some("value cannot be null".as_bytes()));
    }

    #[test]
    fn test_record_preserves_key_payload_and_timestamp() {
        let mut msg = SinkMessage::new(
            Partition::new("om_default_events", 2),
            9,
            Some(br#"{"id":"e1"}"#.to_vec()),
        )
        .with_key("customer-1")
        .with_timestamp(1_700_000_000_000);
        msg.set_error(ProcessingError::dead_letter("missing value property at $.tokens"));

        let record = dead_letter_record(&msg, "om_default_events_deadletter");

        assert_eq!(record.topic, "om_default_events_deadletter");
        assert_eq!(record.key, Some("customer-1".as_bytes()));
        assert_eq!(record.payload, Some(br#"{"id":"e1"}"#.as_slice()));
        assert_eq!(record.timestamp, Some(1_700_000_000_000));
        let headers = record.headers.as_ref().unwrap();
        assert_eq!(
            headers.get(0).value,
            Some("missing value property at $.tokens".as_bytes())
        );
    }

    #[test]
    fn test_record_without_key_or_timestamp() {
        let msg = SinkMessage::new(Partition::new("om_default_events", 0), 1, None);

        let record = dead_letter_record(&msg, "om_default_events_deadletter");

        assert_eq!(record.key, None);
        assert_eq!(record.payload, None);
        assert_eq!(record.timestamp, None);
    }
}
