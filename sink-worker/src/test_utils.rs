//! In-memory stand-ins for the sink's collaborators, shared by unit and
//! integration tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;

use crate::dead_letter::{DeadLetterError, DeadLetterSink};
use crate::error::ProcessingError;
use crate::event::Event;
use crate::message::{Partition, PartitionOffset, SinkMessage};
use crate::meter::MeterDefinition;
use crate::sink::OffsetCommitter;
use crate::storage::{Storage, StorageError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// How `FakeStorage` fails a batch insert for a namespace
#[derive(Debug, Clone)]
pub enum InsertFailure {
    DeadLetter(String),
    Drop(String),
    Unavailable(String),
}

impl From<&InsertFailure> for StorageError {
    fn from(failure: &InsertFailure) -> Self {
        match failure {
            InsertFailure::DeadLetter(m) => ProcessingError::dead_letter(m.clone()).into(),
            InsertFailure::Drop(m) => ProcessingError::drop(m.clone()).into(),
            InsertFailure::Unavailable(m) => StorageError::Unavailable(m.clone()),
        }
    }
}

#[derive(Default)]
pub struct FakeStorage {
    meters: Mutex<Vec<MeterDefinition>>,
    meters_unavailable: Mutex<bool>,
    failures: Mutex<HashMap<String, InsertFailure>>,
    inserted: Mutex<Vec<(String, Vec<Event>)>>,
}

impl FakeStorage {
    pub fn new(meters: Vec<MeterDefinition>) -> Self {
        Self {
            meters: Mutex::new(meters),
            ..Default::default()
        }
    }

    pub fn set_meters(&self, meters: Vec<MeterDefinition>) {
        *lock(&self.meters) = meters;
    }

    pub fn set_meters_unavailable(&self, unavailable: bool) {
        *lock(&self.meters_unavailable) = unavailable;
    }

    pub fn fail_namespace(&self, namespace: &str, failure: InsertFailure) {
        lock(&self.failures).insert(namespace.to_string(), failure);
    }

    /// Every successful insert, in call order
    pub fn inserted(&self) -> Vec<(String, Vec<Event>)> {
        lock(&self.inserted).clone()
    }

    pub fn inserted_events(&self, namespace: &str) -> Vec<Event> {
        lock(&self.inserted)
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .flat_map(|(_, events)| events.clone())
            .collect()
    }
}

#[async_trait]
impl Storage for FakeStorage {
    async fn batch_insert(&self, namespace: &str, events: &[Event]) -> Result<(), StorageError> {
        if let Some(failure) = lock(&self.failures).get(namespace) {
            return Err(failure.into());
        }
        lock(&self.inserted).push((namespace.to_string(), events.to_vec()));
        Ok(())
    }

    async fn get_meter_definitions(&self) -> Result<Vec<MeterDefinition>, StorageError> {
        if *lock(&self.meters_unavailable) {
            return Err(StorageError::Unavailable("meter store down".to_string()));
        }
        Ok(lock(&self.meters).clone())
    }
}

#[derive(Default)]
pub struct FakeDeadLetterSink {
    published: Mutex<Vec<SinkMessage>>,
    fail: Mutex<bool>,
}

impl FakeDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    pub fn published(&self) -> Vec<SinkMessage> {
        lock(&self.published).clone()
    }
}

#[async_trait]
impl DeadLetterSink for FakeDeadLetterSink {
    async fn publish(&self, messages: &[SinkMessage]) -> Result<(), DeadLetterError> {
        if *lock(&self.fail) {
            let first = messages.first().map(|m| m.physical_key()).unwrap_or_default();
            return Err(DeadLetterError::Publish {
                topic: "deadletter".to_string(),
                key: first,
                source: KafkaError::MessageProduction(RDKafkaErrorCode::BrokerTransportFailure),
            });
        }
        lock(&self.published).extend_from_slice(messages);
        Ok(())
    }
}

/// Records stored and committed offsets against a fixed assignment
pub struct FakeCommitter {
    assigned: Mutex<Vec<Partition>>,
    stored: Mutex<Vec<(Partition, i64)>>,
    commits: Mutex<Vec<Vec<PartitionOffset>>>,
    fail_commit: Mutex<bool>,
}

impl FakeCommitter {
    pub fn new(assigned: Vec<Partition>) -> Self {
        Self {
            assigned: Mutex::new(assigned),
            stored: Mutex::new(vec![]),
            commits: Mutex::new(vec![]),
            fail_commit: Mutex::new(false),
        }
    }

    pub fn set_assignment(&self, assigned: Vec<Partition>) {
        *lock(&self.assigned) = assigned;
    }

    pub fn set_commit_failing(&self, fail: bool) {
        *lock(&self.fail_commit) = fail;
    }

    pub fn stored(&self) -> Vec<(Partition, i64)> {
        lock(&self.stored).clone()
    }

    pub fn commits(&self) -> Vec<Vec<PartitionOffset>> {
        lock(&self.commits).clone()
    }

    pub fn last_commit(&self) -> Option<Vec<PartitionOffset>> {
        lock(&self.commits).last().cloned()
    }
}

impl OffsetCommitter for FakeCommitter {
    fn assignment(&self) -> Result<Vec<Partition>, KafkaError> {
        Ok(lock(&self.assigned).clone())
    }

    fn store_offset(&self, partition: &Partition, offset: i64) -> Result<(), KafkaError> {
        lock(&self.stored).push((partition.clone(), offset));
        Ok(())
    }

    fn commit(&self, offsets: &[PartitionOffset]) -> Result<(), KafkaError> {
        if *lock(&self.fail_commit) {
            return Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::BrokerTransportFailure));
        }
        lock(&self.commits).push(offsets.to_vec());
        Ok(())
    }
}

/// Build a polled message whose payload is `event` serialized as JSON
pub fn event_message(topic: &str, partition: i32, offset: i64, event: &Event) -> SinkMessage {
    let payload = serde_json::to_vec(event).unwrap_or_default();
    SinkMessage::new(Partition::new(topic, partition), offset, Some(payload))
}

pub fn api_call(id: &str, data: &str) -> Event {
    Event {
        id: id.to_string(),
        event_type: "api-calls".to_string(),
        source: "gateway".to_string(),
        subject: "customer-1".to_string(),
        time: 1_700_000_000_000,
        data: data.to_string(),
    }
}
