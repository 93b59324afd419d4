use envconfig::Envconfig;
use rdkafka::ClientConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "om_sink")]
    pub kafka_consumer_group: String,

    // We default to "earliest" so a fresh consumer group never skips usage events
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    #[envconfig(default = "60000")]
    pub kafka_session_timeout_ms: u32,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
}

/// Kafka consumer configuration builder with defaults for the sink consumer.
///
/// The sink owns its offsets: nothing is stored or committed behind its back.
/// Offsets are stored per message once buffered and committed explicitly after
/// a flush has durably persisted the batch.
pub struct ConsumerConfigBuilder {
    config: ClientConfig,
}

impl ConsumerConfigBuilder {
    /// Sets: auto.offset.store=false, auto.commit=false, socket.timeout.ms,
    /// session.timeout.ms, heartbeat.interval.ms, max.poll.interval.ms.
    pub fn for_sink_consumer(bootstrap_servers: &str, group_id: &str) -> Self {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("statistics.interval.ms", "10000");

        config
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "false")
            .set("socket.timeout.ms", "10000")
            .set("session.timeout.ms", "60000")
            .set("heartbeat.interval.ms", "5000")
            .set("max.poll.interval.ms", "300000");

        Self { config }
    }

    /// Start from the environment-driven settings
    pub fn from_kafka_config(kafka: &KafkaConfig) -> Self {
        Self::for_sink_consumer(&kafka.kafka_hosts, &kafka.kafka_consumer_group)
            .with_tls(kafka.kafka_tls)
            .with_offset_reset(&kafka.kafka_consumer_offset_reset)
            .with_session_timeout_ms(kafka.kafka_session_timeout_ms)
    }

    /// Enable TLS/SSL for Kafka connection
    pub fn with_tls(mut self, enabled: bool) -> Self {
        if enabled {
            self.config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        self
    }

    /// Add any custom configuration
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.config.set(key, value);
        self
    }

    pub fn with_offset_reset(mut self, policy: &str) -> Self {
        self.config.set("auto.offset.reset", policy);
        self
    }

    /// How long the broker waits for heartbeats before declaring the sink dead.
    /// Heartbeats are kept at a third of it.
    pub fn with_session_timeout_ms(mut self, ms: u32) -> Self {
        self.config
            .set("session.timeout.ms", ms.to_string())
            .set("heartbeat.interval.ms", (ms / 3).max(1).to_string());
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kafka_config() -> KafkaConfig {
        KafkaConfig {
            kafka_hosts: "kafka:9092".to_string(),
            kafka_tls: false,
            kafka_consumer_group: "om_sink".to_string(),
            kafka_consumer_offset_reset: "earliest".to_string(),
            kafka_session_timeout_ms: 30000,
            kafka_producer_linger_ms: 20,
            kafka_producer_queue_mib: 400,
            kafka_message_timeout_ms: 20000,
            kafka_compression_codec: "none".to_string(),
        }
    }

    #[test]
    fn test_sink_consumer_never_commits_on_its_own() {
        let config = ConsumerConfigBuilder::from_kafka_config(&kafka_config()).build();

        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(config.get("group.id"), Some("om_sink"));
        assert_eq!(config.get("bootstrap.servers"), Some("kafka:9092"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
    }

    #[test]
    fn test_session_timeout_sets_heartbeat() {
        let config = ConsumerConfigBuilder::from_kafka_config(&kafka_config()).build();

        assert_eq!(config.get("session.timeout.ms"), Some("30000"));
        assert_eq!(config.get("heartbeat.interval.ms"), Some("10000"));
    }

    #[test]
    fn test_tls_only_when_enabled() {
        let plain = ConsumerConfigBuilder::for_sink_consumer("kafka:9092", "g").build();
        assert_eq!(plain.get("security.protocol"), None);

        let tls = ConsumerConfigBuilder::for_sink_consumer("kafka:9092", "g")
            .with_tls(true)
            .build();
        assert_eq!(tls.get("security.protocol"), Some("ssl"));
    }
}
