use std::fmt;

use async_trait::async_trait;
use common_redis::CustomRedisError;
use thiserror::Error;

use crate::event::Event;

mod memory;
mod redis;

pub use memory::MemoryDeduplicator;
pub use redis::RedisDeduplicator;

/// Logical identity of an event across redeliveries and restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey {
    pub namespace: String,
    pub id: String,
    pub source: String,
}

impl DedupeKey {
    pub fn new(namespace: &str, event: &Event) -> Self {
        Self {
            namespace: namespace.to_string(),
            id: event.id.clone(),
            source: event.source.clone(),
        }
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.namespace, self.source, self.id)
    }
}

#[derive(Error, Debug)]
pub enum DedupeError {
    #[error("redis error: {0}")]
    Redis(#[from] CustomRedisError),
}

/// `is_unique` is a pure read. Keys are only recorded by `set`, which the
/// engine calls after the events are durably stored.
#[async_trait]
pub trait Deduplicator: Send + Sync {
    async fn is_unique(&self, key: &DedupeKey) -> Result<bool, DedupeError>;

    async fn set(&self, keys: &[DedupeKey]) -> Result<(), DedupeError>;
}
