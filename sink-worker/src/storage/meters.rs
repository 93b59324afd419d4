use std::collections::BTreeMap;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::warn;

use super::StorageError;
use crate::meter::{InvalidMeter, MeterDefinition};

const METERS_QUERY: &str = "SELECT slug, namespace, event_type, aggregation, value_property, group_by FROM meters WHERE deleted_at IS NULL ORDER BY namespace, slug";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MeterRow {
    pub slug: String,
    pub namespace: String,
    pub event_type: String,
    pub aggregation: String,
    pub value_property: Option<String>,
    pub group_by: Option<Json<BTreeMap<String, String>>>,
}

impl TryFrom<MeterRow> for MeterDefinition {
    type Error = InvalidMeter;

    fn try_from(row: MeterRow) -> Result<Self, Self::Error> {
        Ok(MeterDefinition {
            aggregation: row.aggregation.parse()?,
            slug: row.slug,
            namespace: row.namespace,
            event_type: row.event_type,
            value_property: row.value_property.unwrap_or_default(),
            group_by: row.group_by.map(|g| g.0).unwrap_or_default(),
        })
    }
}

pub struct PgMeterRepository {
    pool: PgPool,
}

impl PgMeterRepository {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn fetch_all(&self) -> Result<Vec<MeterDefinition>, StorageError> {
        let rows = sqlx::query_as::<_, MeterRow>(METERS_QUERY)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let slug = row.slug.clone();
                match MeterDefinition::try_from(row) {
                    Ok(meter) => Some(meter),
                    Err(e) => {
                        warn!(slug = %slug, error = %e, "Skipping unreadable meter row");
                        None
                    }
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::MeterAggregation;

    fn row(aggregation: &str) -> MeterRow {
        MeterRow {
            slug: "api_duration".to_string(),
            namespace: "default".to_string(),
            event_type: "api-calls".to_string(),
            aggregation: aggregation.to_string(),
            value_property: Some("$.duration_ms".to_string()),
            group_by: Some(Json(BTreeMap::from([(
                "method".to_string(),
                "$.method".to_string(),
            )]))),
        }
    }

    #[test]
    fn test_row_converts_to_meter_definition() {
        let meter = MeterDefinition::try_from(row("SUM")).unwrap();

        assert_eq!(meter.aggregation, MeterAggregation::Sum);
        assert_eq!(meter.value_property, "$.duration_ms");
        assert_eq!(meter.group_by.get("method").unwrap(), "$.method");
    }

    #[test]
    fn test_null_columns_default_to_empty() {
        let mut r = row("COUNT");
        r.value_property = None;
        r.group_by = None;

        let meter = MeterDefinition::try_from(r).unwrap();
        assert_eq!(meter.value_property, "");
        assert!(meter.group_by.is_empty());
    }

    #[test]
    fn test_unknown_aggregation_is_rejected() {
        assert!(MeterDefinition::try_from(row("PERCENTILE")).is_err());
    }
}
