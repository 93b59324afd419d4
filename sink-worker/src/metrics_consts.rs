/// Messages polled off a namespace topic
pub const MESSAGES_RECEIVED: &str = "sink_messages_received_total";

/// Messages discarded, labelled by `reason`
pub const MESSAGES_DROPPED: &str = "sink_messages_dropped_total";

/// Messages republished to a dead-letter topic
pub const MESSAGES_DEAD_LETTERED: &str = "sink_messages_dead_lettered_total";

/// Events written to storage, labelled by `namespace`
pub const EVENTS_STORED: &str = "sink_events_stored_total";

/// Same logical event seen twice within one flush
pub const IN_BATCH_DUPLICATES: &str = "sink_in_batch_duplicates_total";

pub const FLUSH_DURATION_MS: &str = "sink_flush_duration_ms";
pub const FLUSH_SIZE: &str = "sink_flush_size";

pub const OFFSET_COMMIT_FAILURES: &str = "sink_offset_commit_failures_total";
pub const DEAD_LETTER_PUBLISH_DURATION_MS: &str = "sink_dead_letter_publish_duration_ms";

pub const NAMESPACE_REFRESH_FAILURES: &str = "sink_namespace_refresh_failures_total";

/// Gauge of meters currently indexed
pub const METERS_LOADED: &str = "sink_meters_loaded";

/// Kafka client errors, labelled by `error`
pub const KAFKA_ERRORS: &str = "sink_kafka_errors_total";

pub const PARTITIONS_ASSIGNED: &str = "sink_partitions_assigned_total";
pub const PARTITIONS_REVOKED: &str = "sink_partitions_revoked_total";

/// Namespaces left out of the subscription because their topic does not resolve back
pub const UNROUTABLE_NAMESPACES: &str = "sink_unroutable_namespaces_total";
