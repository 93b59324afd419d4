//! Offset Tracker - highest processed offset per partition
//!
//! The tracker only lives as long as one engine instance. Durable progress is
//! whatever was last committed to Kafka; this structure just remembers what has
//! been processed since then so a flush knows what to commit.

use dashmap::DashMap;
use tracing::debug;

use crate::message::{Partition, PartitionOffset};

#[derive(Default)]
pub struct OffsetTracker {
    highest_seen: DashMap<Partition, i64>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a processed offset. Lower or equal offsets are ignored.
    pub fn add(&self, partition: &Partition, offset: i64) {
        self.highest_seen
            .entry(partition.clone())
            .and_modify(|current| {
                // Only advance, never go backwards
                if offset > *current {
                    *current = offset;
                }
            })
            .or_insert(offset);
    }

    /// Offsets to commit for the given assignment: highest seen + 1 for every
    /// assigned partition with history. Anything not assigned is left out.
    pub fn get(&self, assigned: &[Partition]) -> Vec<PartitionOffset> {
        let mut offsets: Vec<PartitionOffset> = assigned
            .iter()
            .filter_map(|partition| {
                self.highest_seen
                    .get(partition)
                    .map(|offset| PartitionOffset::new(partition.clone(), *offset + 1))
            })
            .collect();
        offsets.sort_by(|a, b| a.partition().cmp(b.partition()));
        offsets
    }

    pub fn clear_partition(&self, partition: &Partition) {
        if let Some((_, offset)) = self.highest_seen.remove(partition) {
            debug!(
                topic = partition.topic(),
                partition = partition.partition_number(),
                offset,
                "Cleared tracked offset for revoked partition"
            );
        }
    }

    pub fn partition_count(&self) -> usize {
        self.highest_seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_are_monotonic() {
        let tracker = OffsetTracker::new();
        let p = Partition::new("om_default_events", 0);

        tracker.add(&p, 1);
        tracker.add(&p, 2);
        tracker.add(&p, 2);
        tracker.add(&p, 1);

        let offsets = tracker.get(std::slice::from_ref(&p));
        assert_eq!(offsets, vec![PartitionOffset::new(p, 3)]);
    }

    #[test]
    fn test_first_insert_is_taken_as_is() {
        let tracker = OffsetTracker::new();
        let p = Partition::new("t", 1);

        tracker.add(&p, 0);

        assert_eq!(tracker.get(std::slice::from_ref(&p))[0].offset(), 1);
    }

    #[test]
    fn test_unassigned_partitions_are_excluded() {
        let tracker = OffsetTracker::new();
        let owned = Partition::new("t", 0);
        let revoked = Partition::new("t", 1);

        tracker.add(&owned, 10);
        tracker.add(&revoked, 20);

        let offsets = tracker.get(std::slice::from_ref(&owned));
        assert_eq!(offsets.len(), 1);
        assert_eq!(offsets[0].partition(), &owned);
        assert_eq!(offsets[0].offset(), 11);

        let unknown = Partition::new("t", 9);
        assert!(tracker.get(&[unknown]).is_empty());
    }

    #[test]
    fn test_clear_partition_forgets_history() {
        let tracker = OffsetTracker::new();
        let p = Partition::new("t", 0);

        tracker.add(&p, 50);
        tracker.clear_partition(&p);
        assert_eq!(tracker.partition_count(), 0);

        tracker.add(&p, 5);
        assert_eq!(tracker.get(std::slice::from_ref(&p))[0].offset(), 6);
    }
}
