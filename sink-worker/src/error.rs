use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::dead_letter::DeadLetterError;
use crate::dedupe::DedupeError;
use crate::storage::StorageError;

/// What the sink does with a message it could not process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingControl {
    /// Discard silently: unknown namespace, undecodable bytes, duplicate.
    Drop,
    /// Preserve on the namespace's dead-letter topic for inspection.
    DeadLetter,
}

impl ProcessingControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingControl::Drop => "drop",
            ProcessingControl::DeadLetter => "deadletter",
        }
    }
}

/// Classification of an expected per-message (or per-batch) failure. This is a
/// value carried alongside the message, never a reason to stop the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ProcessingError {
    pub message: String,
    pub control: ProcessingControl,
}

impl ProcessingError {
    pub fn drop(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            control: ProcessingControl::Drop,
        }
    }

    pub fn dead_letter(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            control: ProcessingControl::DeadLetter,
        }
    }

    pub fn is_drop(&self) -> bool {
        self.control == ProcessingControl::Drop
    }

    pub fn is_dead_letter(&self) -> bool {
        self.control == ProcessingControl::DeadLetter
    }
}

/// Infrastructure failures. Any of these stops the engine; the process is
/// expected to be restarted and to replay from the last committed offsets.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("deduplication store failure: {0}")]
    Dedupe(#[from] DedupeError),

    #[error("failed to store batch for namespace {namespace}: {source}")]
    Storage {
        namespace: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to fetch meter definitions: {0}")]
    MeterDefinitions(#[source] StorageError),

    #[error("failed to publish dead letters: {0}")]
    DeadLetter(#[from] DeadLetterError),

    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_error_classification() {
        let dropped = ProcessingError::drop("namespace not found");
        assert!(dropped.is_drop());
        assert!(!dropped.is_dead_letter());
        assert_eq!(dropped.to_string(), "namespace not found");

        let dead = ProcessingError::dead_letter("value cannot be null");
        assert!(dead.is_dead_letter());
        assert_eq!(dead.control.as_str(), "deadletter");
    }
}
