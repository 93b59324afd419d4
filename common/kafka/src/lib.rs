pub mod config;
pub mod kafka_producer;

pub use config::{ConsumerConfigBuilder, KafkaConfig};
pub use kafka_producer::create_kafka_producer;
