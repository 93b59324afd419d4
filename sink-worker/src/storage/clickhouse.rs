use chrono::Utc;
use clickhouse::{Client, Row};
use serde::Serialize;
use tracing::debug;

use super::StorageError;
use crate::config::ClickHouseConfig;
use crate::error::ProcessingError;
use crate::event::Event;

#[derive(Row, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRow {
    pub namespace: String,
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub subject: String,
    /// DateTime64(3)
    pub time: i64,
    pub data: String,
    pub ingested_at: i64,
}

impl EventRow {
    pub fn new(namespace: &str, event: &Event, ingested_at: i64) -> Self {
        Self {
            namespace: namespace.to_string(),
            id: event.id.clone(),
            event_type: event.event_type.clone(),
            source: event.source.clone(),
            subject: event.subject.clone(),
            time: event.time,
            data: event.data.clone(),
            ingested_at,
        }
    }
}

pub struct ClickHouseEvents {
    client: Client,
    table: String,
}

impl ClickHouseEvents {
    pub fn new(config: &ClickHouseConfig) -> Self {
        let client = Client::default()
            .with_url(&config.clickhouse_url)
            .with_database(&config.clickhouse_database)
            .with_user(&config.clickhouse_user)
            .with_password(&config.clickhouse_password);

        Self {
            client,
            table: config.clickhouse_events_table.clone(),
        }
    }

    pub async fn insert_batch(&self, namespace: &str, events: &[Event]) -> Result<(), StorageError> {
        if events.is_empty() {
            return Ok(());
        }

        let ingested_at = Utc::now().timestamp_millis();
        let mut insert = self
            .client
            .insert::<EventRow>(&self.table)
            .map_err(classify_insert_error)?;
        for event in events {
            insert
                .write(&EventRow::new(namespace, event, ingested_at))
                .await
                .map_err(classify_insert_error)?;
        }
        insert.end().await.map_err(classify_insert_error)?;

        debug!(namespace, rows = events.len(), "Inserted event batch");
        Ok(())
    }
}

/// ClickHouse answering with an error about the rows themselves means the batch
/// can never succeed; anything else is an availability problem.
pub(crate) fn classify_insert_error(err: clickhouse::error::Error) -> StorageError {
    match err {
        clickhouse::error::Error::BadResponse(reason) => {
            StorageError::Processing(ProcessingError::dead_letter(format!(
                "storage rejected batch: {reason}"
            )))
        }
        other => StorageError::ClickHouse(other),
    }
}
