use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;

use super::{DedupeError, DedupeKey, Deduplicator};

/// Process-local deduplicator for single-instance deployments. Seen keys are
/// lost on restart, so replays after a crash are only caught by storage.
#[derive(Clone)]
pub struct MemoryDeduplicator {
    seen: Cache<DedupeKey, ()>,
}

impl MemoryDeduplicator {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let seen = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();

        Self { seen }
    }
}

impl std::fmt::Debug for MemoryDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDeduplicator")
            .field("entries", &self.seen.entry_count())
            .finish()
    }
}

#[async_trait]
impl Deduplicator for MemoryDeduplicator {
    async fn is_unique(&self, key: &DedupeKey) -> Result<bool, DedupeError> {
        Ok(self.seen.get(key).is_none())
    }

    async fn set(&self, keys: &[DedupeKey]) -> Result<(), DedupeError> {
        for key in keys {
            self.seen.insert(key.clone(), ());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> DedupeKey {
        DedupeKey {
            namespace: "default".to_string(),
            id: id.to_string(),
            source: "s".to_string(),
        }
    }

    #[tokio::test]
    async fn test_keys_are_only_seen_after_set() {
        let dedupe = MemoryDeduplicator::new(100, Duration::from_secs(60));

        assert!(dedupe.is_unique(&key("1")).await.unwrap());
        assert!(dedupe.is_unique(&key("1")).await.unwrap());

        dedupe.set(&[key("1")]).await.unwrap();

        assert!(!dedupe.is_unique(&key("1")).await.unwrap());
        assert!(dedupe.is_unique(&key("2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_source_is_part_of_identity() {
        let dedupe = MemoryDeduplicator::new(100, Duration::from_secs(60));
        dedupe.set(&[key("1")]).await.unwrap();

        let mut other_source = key("1");
        other_source.source = "other".to_string();
        assert!(dedupe.is_unique(&other_source).await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let dedupe = MemoryDeduplicator::new(100, Duration::from_millis(50));
        dedupe.set(&[key("1")]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(dedupe.is_unique(&key("1")).await.unwrap());
    }
}
