use async_trait::async_trait;
use thiserror::Error;

use crate::error::ProcessingError;
use crate::event::Event;
use crate::meter::MeterDefinition;

mod clickhouse;
mod meters;

pub use self::clickhouse::{ClickHouseEvents, EventRow};
pub use self::meters::{MeterRow, PgMeterRepository};

#[derive(Error, Debug)]
pub enum StorageError {
    /// The store rejected the batch itself; the engine drops or dead-letters it.
    #[error(transparent)]
    Processing(#[from] ProcessingError),
    #[error("clickhouse error: {0}")]
    ClickHouse(#[from] ::clickhouse::error::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn as_processing(&self) -> Option<&ProcessingError> {
        match self {
            StorageError::Processing(e) => Some(e),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn batch_insert(&self, namespace: &str, events: &[Event]) -> Result<(), StorageError>;

    async fn get_meter_definitions(&self) -> Result<Vec<MeterDefinition>, StorageError>;
}

/// Events go to ClickHouse, meter definitions come from Postgres.
pub struct SinkStorage {
    events: ClickHouseEvents,
    meters: PgMeterRepository,
}

impl SinkStorage {
    pub fn new(events: ClickHouseEvents, meters: PgMeterRepository) -> Self {
        Self { events, meters }
    }
}

#[async_trait]
impl Storage for SinkStorage {
    async fn batch_insert(&self, namespace: &str, events: &[Event]) -> Result<(), StorageError> {
        self.events.insert_batch(namespace, events).await
    }

    async fn get_meter_definitions(&self) -> Result<Vec<MeterDefinition>, StorageError> {
        self.meters.fetch_all().await
    }
}
