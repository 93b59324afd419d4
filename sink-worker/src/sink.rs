use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashSet;
use rdkafka::error::KafkaError;
use tracing::{debug, info, warn};

use crate::buffer::SinkBuffer;
use crate::dead_letter::DeadLetterSink;
use crate::dedupe::{DedupeKey, Deduplicator};
use crate::error::{ProcessingControl, ProcessingError, SinkError};
use crate::event::Event;
use crate::message::{Partition, PartitionOffset, SinkMessage};
use crate::metrics_consts::{
    EVENTS_STORED, FLUSH_DURATION_MS, FLUSH_SIZE, IN_BATCH_DUPLICATES, MESSAGES_DEAD_LETTERED,
    MESSAGES_DROPPED, MESSAGES_RECEIVED, METERS_LOADED, OFFSET_COMMIT_FAILURES,
};
use crate::namespace::NamespaceStore;
use crate::offset_tracker::OffsetTracker;
use crate::storage::Storage;
use crate::topic::NamespaceTopics;

pub const UNKNOWN_TOPIC: &str = "cannot resolve namespace from topic";
pub const UNDECODABLE_PAYLOAD: &str = "cannot decode event payload";
pub const DUPLICATE_EVENT: &str = "duplicate event";

/// The slice of the Kafka consumer the engine drives: where it is assigned,
/// staging positions, and committing them.
pub trait OffsetCommitter: Send + Sync {
    fn assignment(&self) -> Result<Vec<Partition>, KafkaError>;

    fn store_offset(&self, partition: &Partition, offset: i64) -> Result<(), KafkaError>;

    fn commit(&self, offsets: &[PartitionOffset]) -> Result<(), KafkaError>;
}

/// What one flush did with the batch it drained
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushSummary {
    pub messages: usize,
    pub stored: BTreeMap<String, usize>,
    pub dead_lettered: usize,
    pub dropped: usize,
    pub in_batch_duplicates: usize,
    pub committed: Vec<PartitionOffset>,
}

impl FlushSummary {
    pub fn stored_total(&self) -> usize {
        self.stored.values().sum()
    }
}

/// Messages of one flush, split by what happens to them
#[derive(Default)]
struct Partitioned {
    dead_letter: Vec<SinkMessage>,
    dropped: usize,
    duplicates: usize,
    by_namespace: BTreeMap<String, Vec<SinkMessage>>,
}

pub struct Sink {
    namespaces: Arc<NamespaceStore>,
    topics: NamespaceTopics,
    dedupe: Arc<dyn Deduplicator>,
    storage: Arc<dyn Storage>,
    dead_letters: Arc<dyn DeadLetterSink>,
    offsets: Arc<OffsetTracker>,
    buffer: SinkBuffer,
    min_commit_count: usize,
}

impl Sink {
    pub fn new(
        namespaces: Arc<NamespaceStore>,
        topics: NamespaceTopics,
        dedupe: Arc<dyn Deduplicator>,
        storage: Arc<dyn Storage>,
        dead_letters: Arc<dyn DeadLetterSink>,
        offsets: Arc<OffsetTracker>,
        min_commit_count: usize,
    ) -> Self {
        Self {
            namespaces,
            topics,
            dedupe,
            storage,
            dead_letters,
            offsets,
            buffer: SinkBuffer::new(),
            min_commit_count,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.size()
    }

    pub fn offsets(&self) -> &Arc<OffsetTracker> {
        &self.offsets
    }

    /// Reload every meter definition and return the topics to subscribe to.
    pub async fn refresh_namespaces(&self) -> Result<Vec<String>, SinkError> {
        let meters = self
            .storage
            .get_meter_definitions()
            .await
            .map_err(SinkError::MeterDefinitions)?;

        let loaded = self.namespaces.load(meters);
        metrics::gauge!(METERS_LOADED).set(loaded as f64);

        let namespaces = self.namespaces.namespaces();
        Ok(self
            .topics
            .subscription_topics(namespaces.iter().map(String::as_str)))
    }

    /// Classify one polled message and buffer it. Returns true once the buffer
    /// has reached the size that should trigger a flush.
    ///
    /// Only a dedupe store failure is an error here; every per-message problem
    /// is attached to the message and settled at flush time.
    pub async fn handle_message(
        &self,
        mut msg: SinkMessage,
        committer: &dyn OffsetCommitter,
    ) -> Result<bool, SinkError> {
        metrics::counter!(MESSAGES_RECEIVED).increment(1);

        if let Some(e) = self.classify(&mut msg).await? {
            debug!(
                topic = msg.topic(),
                partition = msg.partition().partition_number(),
                offset = msg.offset(),
                reason = %e,
                control = e.control.as_str(),
                "Message classified"
            );
            msg.set_error(e);
        }

        let partition = msg.partition().clone();
        let offset = msg.offset();
        self.buffer.add(msg);
        self.offsets.add(&partition, offset);

        if let Err(e) = committer.store_offset(&partition, offset) {
            // Most likely revoked since the poll
            warn!(
                topic = partition.topic(),
                partition = partition.partition_number(),
                offset,
                error = ?e,
                "Failed to store offset"
            );
        }

        Ok(self.buffer.size() >= self.min_commit_count)
    }

    /// Resolves namespace and event onto the message and returns its
    /// classification, if it has one.
    async fn classify(&self, msg: &mut SinkMessage) -> Result<Option<ProcessingError>, SinkError> {
        let Some(namespace) = self.topics.namespace_from_topic(msg.topic()) else {
            return Ok(Some(ProcessingError::drop(UNKNOWN_TOPIC)));
        };
        let namespace = namespace.to_string();

        let decoded = msg
            .payload()
            .and_then(|p| serde_json::from_slice::<Event>(p).ok());
        msg.namespace = Some(namespace.clone());
        let Some(event) = decoded else {
            return Ok(Some(ProcessingError::drop(UNDECODABLE_PAYLOAD)));
        };

        let unique = self
            .dedupe
            .is_unique(&DedupeKey::new(&namespace, &event))
            .await?;
        let outcome = if unique {
            self.namespaces.validate_event(&namespace, &event).err()
        } else {
            Some(ProcessingError::drop(DUPLICATE_EVENT))
        };

        msg.event = Some(event);
        Ok(outcome)
    }

    /// Drain the buffer and settle every message in it: store, dead-letter or
    /// drop, then commit and record dedupe keys. Errors are fatal. Storage and
    /// dead-letter failures leave the drained batch uncommitted; a dedupe
    /// failure happens after the commit.
    pub async fn flush(&self, committer: &dyn OffsetCommitter) -> Result<FlushSummary, SinkError> {
        let mut messages = self.buffer.dequeue();
        if messages.is_empty() {
            return Ok(FlushSummary::default());
        }

        let started = Instant::now();
        // Poll order within each partition
        messages.sort_by(|a, b| {
            a.partition()
                .cmp(b.partition())
                .then(a.offset().cmp(&b.offset()))
        });

        let mut summary = FlushSummary {
            messages: messages.len(),
            ..Default::default()
        };
        metrics::histogram!(FLUSH_SIZE).record(messages.len() as f64);

        let Partitioned {
            mut dead_letter,
            mut dropped,
            duplicates,
            by_namespace,
        } = partition_batch(messages);
        summary.in_batch_duplicates = duplicates;

        let mut stored_keys = Vec::new();
        for (namespace, batch) in by_namespace {
            let events: Vec<Event> = batch.iter().filter_map(|m| m.event.clone()).collect();

            match self.storage.batch_insert(&namespace, &events).await {
                Ok(()) => {
                    stored_keys.extend(batch.iter().filter_map(SinkMessage::dedupe_key));
                    metrics::counter!(EVENTS_STORED, "namespace" => namespace.clone())
                        .increment(events.len() as u64);
                    summary.stored.insert(namespace, events.len());
                }
                Err(e) => match e.as_processing().map(|p| p.control) {
                    Some(ProcessingControl::DeadLetter) => {
                        warn!(
                            namespace = %namespace,
                            events = events.len(),
                            error = ?e,
                            "Storage rejected batch, dead-lettering it"
                        );
                        let reason = ProcessingError::dead_letter(e.to_string());
                        dead_letter.extend(batch.into_iter().map(|mut m| {
                            m.set_error(reason.clone());
                            m
                        }));
                    }
                    Some(ProcessingControl::Drop) => {
                        warn!(
                            namespace = %namespace,
                            events = events.len(),
                            error = ?e,
                            "Storage rejected batch, dropping it"
                        );
                        metrics::counter!(MESSAGES_DROPPED, "reason" => "storage")
                            .increment(batch.len() as u64);
                        dropped += batch.len();
                    }
                    None => return Err(SinkError::Storage { namespace, source: e }),
                },
            }
        }
        summary.dropped = dropped;

        if !dead_letter.is_empty() {
            self.dead_letters.publish(&dead_letter).await?;
            summary.dead_lettered = dead_letter.len();
            metrics::counter!(MESSAGES_DEAD_LETTERED).increment(dead_letter.len() as u64);
            log_dead_letters(&dead_letter);
        }

        summary.committed = self.commit(committer);

        self.dedupe.set(&stored_keys).await?;

        metrics::histogram!(FLUSH_DURATION_MS).record(started.elapsed().as_millis() as f64);
        info!(
            messages = summary.messages,
            stored = summary.stored_total(),
            dead_lettered = summary.dead_lettered,
            dropped = summary.dropped,
            in_batch_duplicates = summary.in_batch_duplicates,
            committed_partitions = summary.committed.len(),
            "Flushed batch"
        );
        Ok(summary)
    }

    /// Commit the next offset for every assigned partition. Failures are only
    /// logged: the batch is already stored, and a replay is caught by dedupe.
    fn commit(&self, committer: &dyn OffsetCommitter) -> Vec<PartitionOffset> {
        let assigned = match committer.assignment() {
            Ok(assigned) => assigned,
            Err(e) => {
                warn!(error = ?e, "Failed to read assignment, skipping offset commit");
                metrics::counter!(OFFSET_COMMIT_FAILURES).increment(1);
                return vec![];
            }
        };

        let offsets = self.offsets.get(&assigned);
        if offsets.is_empty() {
            return offsets;
        }

        match committer.commit(&offsets) {
            Ok(()) => {
                debug!(partitions = offsets.len(), "Committed offsets");
                offsets
            }
            Err(e) => {
                warn!(error = ?e, "Failed to commit offsets");
                metrics::counter!(OFFSET_COMMIT_FAILURES).increment(1);
                vec![]
            }
        }
    }
}

/// In-batch dedupe by logical key, first in poll order wins, then split by
/// classification.
fn partition_batch(messages: Vec<SinkMessage>) -> Partitioned {
    let mut seen: AHashSet<DedupeKey> = AHashSet::new();
    let mut out = Partitioned::default();

    for msg in messages {
        if let Some(key) = msg.dedupe_key() {
            if !seen.insert(key) {
                out.duplicates += 1;
                metrics::counter!(IN_BATCH_DUPLICATES).increment(1);
                continue;
            }
        }

        if msg.is_dead_letter() {
            out.dead_letter.push(msg);
            continue;
        }
        if let Some(e) = &msg.error {
            metrics::counter!(MESSAGES_DROPPED, "reason" => e.message.clone()).increment(1);
            out.dropped += 1;
            continue;
        }

        match msg.namespace.clone() {
            Some(namespace) => out.by_namespace.entry(namespace).or_default().push(msg),
            // Unreachable for messages built by the poll loop; nothing to store
            None => out.dropped += 1,
        }
    }

    out
}

fn log_dead_letters(messages: &[SinkMessage]) {
    let mut reasons: BTreeMap<&str, usize> = BTreeMap::new();
    for msg in messages {
        let reason = msg.error.as_ref().map(|e| e.message.as_str()).unwrap_or("");
        *reasons.entry(reason).or_default() += 1;
    }
    for (reason, count) in reasons {
        warn!(reason, count, "Dead-lettered messages");
    }
}
