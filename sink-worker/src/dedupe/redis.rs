use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common_redis::Client;
use tracing::debug;

use super::{DedupeError, DedupeKey, Deduplicator};

const KEY_PREFIX: &str = "sink:dedupe:";

pub struct RedisDeduplicator {
    client: Arc<dyn Client + Send + Sync>,
    ttl: Duration,
}

impl RedisDeduplicator {
    pub fn new(client: Arc<dyn Client + Send + Sync>, ttl: Duration) -> Self {
        Self { client, ttl }
    }

    fn redis_key(key: &DedupeKey) -> String {
        format!("{KEY_PREFIX}{key}")
    }
}

#[async_trait]
impl Deduplicator for RedisDeduplicator {
    async fn is_unique(&self, key: &DedupeKey) -> Result<bool, DedupeError> {
        let exists = self.client.exists(Self::redis_key(key)).await?;
        Ok(!exists)
    }

    async fn set(&self, keys: &[DedupeKey]) -> Result<(), DedupeError> {
        if keys.is_empty() {
            return Ok(());
        }

        let items = keys
            .iter()
            .map(|k| (Self::redis_key(k), String::new()))
            .collect();
        let written = self
            .client
            .batch_set_nx_ex(items, self.ttl.as_secs().max(1))
            .await?;

        let already_present = written.iter().filter(|w| !**w).count();
        if already_present > 0 {
            debug!(
                keys = keys.len(),
                already_present, "Some dedupe keys were already recorded"
            );
        }
        Ok(())
    }
}
