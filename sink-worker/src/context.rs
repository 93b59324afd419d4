use std::sync::Arc;

use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::{ClientContext, TopicPartitionList};
use tracing::{debug, error, info, warn};

use crate::message::Partition;
use crate::metrics_consts::{PARTITIONS_ASSIGNED, PARTITIONS_REVOKED};
use crate::offset_tracker::OffsetTracker;

/// Rebalance hooks for the sink consumer. Revoked partitions are forgotten by
/// the offset tracker before librdkafka hands them away, so nothing is ever
/// committed for a partition this instance no longer owns.
pub struct SinkConsumerContext {
    offsets: Arc<OffsetTracker>,
}

impl SinkConsumerContext {
    pub fn new(offsets: Arc<OffsetTracker>) -> Self {
        Self { offsets }
    }

    pub fn revoke(&self, partitions: &[Partition]) {
        for partition in partitions {
            self.offsets.clear_partition(partition);
        }
        metrics::counter!(PARTITIONS_REVOKED).increment(partitions.len() as u64);
    }
}

fn to_partitions(list: &TopicPartitionList) -> Vec<Partition> {
    list.elements().into_iter().map(Partition::from).collect()
}

impl ClientContext for SinkConsumerContext {}

impl ConsumerContext for SinkConsumerContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                if partitions.count() == 0 {
                    debug!("Skipping empty revoke rebalance");
                    return;
                }
                info!("Revoking {} partitions", partitions.count());
                self.revoke(&to_partitions(partitions));
            }
            Rebalance::Assign(partitions) => {
                debug!("Pre-rebalance assign event for {} partitions", partitions.count());
            }
            Rebalance::Error(e) => {
                error!("Rebalance error: {}", e);
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                info!("Assigned {} partitions", partitions.count());
                for partition in to_partitions(partitions) {
                    debug!(
                        topic = partition.topic(),
                        partition = partition.partition_number(),
                        "Partition assigned"
                    );
                }
                metrics::counter!(PARTITIONS_ASSIGNED).increment(partitions.count() as u64);
            }
            Rebalance::Revoke(_) => {
                info!("Post-rebalance revoke event");
            }
            Rebalance::Error(e) => {
                error!("Post-rebalance error: {}", e);
            }
        }
    }

    fn commit_callback(
        &self,
        result: rdkafka::error::KafkaResult<()>,
        offsets: &TopicPartitionList,
    ) {
        match result {
            Ok(_) => debug!("Committed offsets for {} partitions", offsets.count()),
            Err(e) => warn!("Failed to commit offsets: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revoke_clears_tracked_offsets() {
        let offsets = Arc::new(OffsetTracker::new());
        let kept = Partition::new("om_default_events", 0);
        let revoked = Partition::new("om_default_events", 1);
        offsets.add(&kept, 10);
        offsets.add(&revoked, 20);

        let context = SinkConsumerContext::new(offsets.clone());
        context.revoke(std::slice::from_ref(&revoked));

        assert_eq!(offsets.partition_count(), 1);
        assert_eq!(offsets.get(&[kept.clone(), revoked.clone()]).len(), 1);
    }

    #[test]
    fn test_partition_list_conversion() {
        let mut list = TopicPartitionList::new();
        list.add_partition("om_a_events", 0);
        list.add_partition("om_b_events", 3);

        let partitions = to_partitions(&list);

        assert_eq!(
            partitions,
            vec![
                Partition::new("om_a_events", 0),
                Partition::new("om_b_events", 3)
            ]
        );
    }
}
