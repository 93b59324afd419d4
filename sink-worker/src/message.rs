use rdkafka::message::{BorrowedMessage, Message, OwnedHeaders};
use rdkafka::topic_partition_list::TopicPartitionListElem;

use crate::dedupe::DedupeKey;
use crate::error::ProcessingError;
use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: impl Into<String>, partition_number: i32) -> Self {
        Self {
            topic: topic.into(),
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }
}

impl From<TopicPartitionListElem<'_>> for Partition {
    fn from(elem: TopicPartitionListElem<'_>) -> Self {
        Self::new(elem.topic(), elem.partition())
    }
}

/// A partition paired with the next offset to read from it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionOffset {
    partition: Partition,
    offset: i64,
}

impl PartitionOffset {
    pub fn new(partition: Partition, offset: i64) -> Self {
        Self { partition, offset }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn topic(&self) -> &str {
        self.partition.topic()
    }

    pub fn partition_number(&self) -> i32 {
        self.partition.partition_number()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

/// One polled Kafka message and what the poll loop learned about it. Lives
/// until the flush that consumes it.
#[derive(Debug, Clone)]
pub struct SinkMessage {
    partition: Partition,
    offset: i64,
    key: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
    timestamp: Option<i64>,
    headers: Option<OwnedHeaders>,

    pub namespace: Option<String>,
    pub event: Option<Event>,
    pub error: Option<ProcessingError>,
}

impl SinkMessage {
    pub fn from_borrowed_message(msg: &BorrowedMessage<'_>) -> Self {
        Self {
            partition: Partition::new(msg.topic(), msg.partition()),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()),
            timestamp: msg.timestamp().to_millis(),
            headers: msg.headers().map(|h| h.detach()),
            namespace: None,
            event: None,
            error: None,
        }
    }

    pub fn new(partition: Partition, offset: i64, payload: Option<Vec<u8>>) -> Self {
        Self {
            partition,
            offset,
            key: None,
            payload,
            timestamp: None,
            headers: None,
            namespace: None,
            event: None,
            error: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn topic(&self) -> &str {
        self.partition.topic()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn headers(&self) -> Option<&OwnedHeaders> {
        self.headers.as_ref()
    }

    /// Identity of the physical message: `topic-partition-offset`
    pub fn physical_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.partition.topic(),
            self.partition.partition_number(),
            self.offset
        )
    }

    /// Logical identity of the decoded event, if there is one
    pub fn dedupe_key(&self) -> Option<DedupeKey> {
        match (&self.namespace, &self.event) {
            (Some(namespace), Some(event)) => Some(DedupeKey::new(namespace, event)),
            _ => None,
        }
    }

    pub fn set_error(&mut self, error: ProcessingError) {
        self.error = Some(error);
    }

    pub fn is_dead_letter(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.is_dead_letter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_key_encodes_position() {
        let msg = SinkMessage::new(Partition::new("om_default_events", 3), 42, None);
        assert_eq!(msg.physical_key(), "om_default_events-3-42");
    }

    #[test]
    fn test_dedupe_key_requires_namespace_and_event() {
        let mut msg = SinkMessage::new(Partition::new("t", 0), 0, None);
        assert!(msg.dedupe_key().is_none());

        msg.namespace = Some("default".to_string());
        msg.event = Some(Event {
            id: "evt-1".to_string(),
            event_type: "api-calls".to_string(),
            source: "gateway".to_string(),
            subject: String::new(),
            time: 0,
            data: String::new(),
        });

        let key = msg.dedupe_key().unwrap();
        assert_eq!(key.to_string(), "default-gateway-evt-1");
    }

    #[test]
    fn test_is_dead_letter() {
        let mut msg = SinkMessage::new(Partition::new("t", 0), 0, None);
        assert!(!msg.is_dead_letter());

        msg.set_error(ProcessingError::drop("dup"));
        assert!(!msg.is_dead_letter());

        msg.set_error(ProcessingError::dead_letter("bad"));
        assert!(msg.is_dead_letter());
    }
}
