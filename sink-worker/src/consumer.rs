use std::time::Duration;

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::SinkConsumerContext;
use crate::error::SinkError;
use crate::health::HealthHandle;
use crate::message::{Partition, PartitionOffset, SinkMessage};
use crate::metrics_consts::{KAFKA_ERRORS, NAMESPACE_REFRESH_FAILURES};
use crate::sink::{OffsetCommitter, Sink};

pub type SinkConsumer = StreamConsumer<SinkConsumerContext>;

impl OffsetCommitter for SinkConsumer {
    fn assignment(&self) -> Result<Vec<Partition>, KafkaError> {
        let list = Consumer::assignment(self)?;
        Ok(list.elements().into_iter().map(Partition::from).collect())
    }

    // Stored offsets follow the commit convention: next offset to read
    fn store_offset(&self, partition: &Partition, offset: i64) -> Result<(), KafkaError> {
        Consumer::store_offset(
            self,
            partition.topic(),
            partition.partition_number(),
            offset + 1,
        )
    }

    fn commit(&self, offsets: &[PartitionOffset]) -> Result<(), KafkaError> {
        let mut list = TopicPartitionList::new();
        for po in offsets {
            list.add_partition_offset(
                po.topic(),
                po.partition_number(),
                Offset::Offset(po.offset()),
            )?;
        }
        Consumer::commit(self, &list, CommitMode::Sync)
    }
}

/// All-brokers-down errors further apart than this belong to separate outages
const BROKER_OUTAGE_QUIET_PERIOD: Duration = Duration::from_secs(60);

/// Consecutive all-brokers-down errors of the current outage. The count starts
/// over once the client is seen working again or the errors stop for a while.
#[derive(Debug, Default)]
struct BrokerOutage {
    errors: u32,
    last_error: Option<Instant>,
}

impl BrokerOutage {
    fn record_error(&mut self, now: Instant) -> u32 {
        if self
            .last_error
            .is_some_and(|last| now.saturating_duration_since(last) > BROKER_OUTAGE_QUIET_PERIOD)
        {
            self.errors = 0;
        }
        self.errors += 1;
        self.last_error = Some(now);
        self.errors
    }

    fn reset(&mut self) {
        self.errors = 0;
        self.last_error = None;
    }
}

pub struct RunnerSettings {
    pub max_commit_wait: Duration,
    pub namespace_refresh_interval: Duration,
    pub poll_timeout: Duration,
    pub reconnect_attempts: u32,
}

/// Drives the sink from a Kafka consumer: subscription upkeep, polling, and
/// the size and timer flush triggers. Everything runs on one task, so a flush
/// blocks polling until it is done.
pub struct SinkRunner {
    consumer: SinkConsumer,
    sink: Sink,
    health: HealthHandle,
    settings: RunnerSettings,
    subscribed: Vec<String>,
    brokers_down: BrokerOutage,
}

impl SinkRunner {
    pub fn new(
        consumer: SinkConsumer,
        sink: Sink,
        health: HealthHandle,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            consumer,
            sink,
            health,
            settings,
            subscribed: vec![],
            brokers_down: BrokerOutage::default(),
        }
    }

    /// Run until cancelled or a fatal error. On cancellation whatever is still
    /// buffered is flushed before returning.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SinkError> {
        // Without meters nothing can be validated, so the first load must succeed
        let topics = self.sink.refresh_namespaces().await?;
        self.subscribe(topics)?;

        let mut refresh = tokio::time::interval_at(
            Instant::now() + self.settings.namespace_refresh_interval,
            self.settings.namespace_refresh_interval,
        );
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let flush_timer = sleep(self.settings.max_commit_wait);
        tokio::pin!(flush_timer);

        info!("Sink consumer started");
        loop {
            self.health.report_healthy();

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, draining buffer");
                    break;
                }

                _ = refresh.tick() => {
                    self.refresh().await?;
                }

                _ = &mut flush_timer => {
                    self.flush().await?;
                    flush_timer.as_mut().reset(Instant::now() + self.settings.max_commit_wait);
                }

                polled = tokio::time::timeout(self.settings.poll_timeout, self.consumer.recv()) => {
                    let msg = match polled {
                        Err(_) => continue,
                        Ok(Err(e)) => {
                            self.handle_kafka_error(e).await?;
                            continue;
                        }
                        Ok(Ok(borrowed)) => SinkMessage::from_borrowed_message(&borrowed),
                    };
                    self.brokers_down.reset();

                    let should_flush = self.sink.handle_message(msg, &self.consumer).await?;
                    if should_flush {
                        self.flush().await?;
                        flush_timer.as_mut().reset(Instant::now() + self.settings.max_commit_wait);
                    }
                }
            }
        }

        self.flush().await?;
        self.consumer.unsubscribe();
        info!("Sink consumer stopped");
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        match self.sink.flush(&self.consumer).await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(error = ?e, "Flush failed");
                Err(e)
            }
        }
    }

    /// A failed meter fetch keeps the current index and subscription
    async fn refresh(&mut self) -> Result<(), SinkError> {
        match self.sink.refresh_namespaces().await {
            Ok(topics) => self.subscribe(topics),
            Err(e) => {
                metrics::counter!(NAMESPACE_REFRESH_FAILURES).increment(1);
                error!(error = ?e, "Namespace refresh failed, keeping stale meter index");
                Ok(())
            }
        }
    }

    /// Replace the subscription with `topics` when it changed
    fn subscribe(&mut self, topics: Vec<String>) -> Result<(), SinkError> {
        if topics == self.subscribed {
            return Ok(());
        }

        if topics.is_empty() {
            warn!("No namespaces with meters, unsubscribing from all topics");
            self.consumer.unsubscribe();
        } else {
            let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            self.consumer.subscribe(&refs)?;
            info!(topics = ?topics, "Subscribed to namespace topics");
        }

        self.subscribed = topics;
        Ok(())
    }

    async fn handle_kafka_error(&mut self, e: KafkaError) -> Result<(), SinkError> {
        match &e {
            KafkaError::MessageConsumption(RDKafkaErrorCode::PartitionEOF) => {
                // Reaching the end of a partition means the broker answered
                self.brokers_down.reset();
                metrics::counter!(KAFKA_ERRORS, &[("level", "info"), ("error", "partition_eof")])
                    .increment(1);
            }
            KafkaError::MessageConsumption(RDKafkaErrorCode::OffsetOutOfRange) => {
                // auto.offset.reset moves the consumer to the configured end
                warn!("Offset out of range, seeking to configured offset reset policy");
                metrics::counter!(
                    KAFKA_ERRORS,
                    &[("level", "info"), ("error", "offset_out_of_range")]
                )
                .increment(1);
            }
            KafkaError::MessageConsumption(code) => {
                warn!("Kafka consumer error: {code:?}");
                metrics::counter!(KAFKA_ERRORS, &[("level", "warn"), ("error", "consumer")])
                    .increment(1);
            }
            KafkaError::MessageConsumptionFatal(code) => {
                error!("Fatal Kafka consumer error: {code:?}");
                metrics::counter!(KAFKA_ERRORS, &[("level", "fatal"), ("error", "consumer")])
                    .increment(1);
                return Err(e.into());
            }
            KafkaError::Global(RDKafkaErrorCode::AllBrokersDown) => {
                let attempts = self.brokers_down.record_error(Instant::now());
                metrics::counter!(
                    KAFKA_ERRORS,
                    &[("level", "warn"), ("error", "all_brokers_down")]
                )
                .increment(1);
                if attempts >= self.settings.reconnect_attempts {
                    error!(
                        attempts,
                        "All brokers down, giving up on reconnecting"
                    );
                    return Err(e.into());
                }
                warn!(
                    attempts,
                    "All brokers down, waiting for reconnect"
                );
                sleep(Duration::from_secs(u64::from(attempts.min(5)))).await;
            }
            KafkaError::Global(RDKafkaErrorCode::BrokerTransportFailure) => {
                warn!("Broker transport failure, waiting for reconnect");
                metrics::counter!(
                    KAFKA_ERRORS,
                    &[("level", "warn"), ("error", "broker_transport")]
                )
                .increment(1);
                sleep(Duration::from_millis(500)).await;
            }
            KafkaError::Global(RDKafkaErrorCode::Authentication) => {
                error!("Kafka authentication failed");
                metrics::counter!(KAFKA_ERRORS, &[("level", "fatal"), ("error", "authentication")])
                    .increment(1);
                return Err(e.into());
            }
            _ => {
                warn!("Kafka error: {e}");
                metrics::counter!(KAFKA_ERRORS, &[("level", "warn"), ("error", "other")])
                    .increment(1);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_outage_counts_consecutive_errors() {
        let mut outage = BrokerOutage::default();
        let start = Instant::now();

        assert_eq!(outage.record_error(start), 1);
        assert_eq!(outage.record_error(start + Duration::from_secs(1)), 2);
        assert_eq!(outage.record_error(start + Duration::from_secs(6)), 3);
    }

    #[test]
    fn test_separate_outages_do_not_add_up() {
        let mut outage = BrokerOutage::default();
        let start = Instant::now();

        outage.record_error(start);
        outage.record_error(start + Duration::from_secs(1));

        let later = start + BROKER_OUTAGE_QUIET_PERIOD + Duration::from_secs(2);
        assert_eq!(outage.record_error(later), 1);
    }

    #[test]
    fn test_reset_starts_a_new_outage() {
        let mut outage = BrokerOutage::default();
        let start = Instant::now();

        outage.record_error(start);
        outage.record_error(start);
        outage.reset();

        assert_eq!(outage.record_error(start), 1);
    }
}
