use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeterAggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    UniqueCount,
}

impl MeterAggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeterAggregation::Sum => "SUM",
            MeterAggregation::Avg => "AVG",
            MeterAggregation::Min => "MIN",
            MeterAggregation::Max => "MAX",
            MeterAggregation::Count => "COUNT",
            MeterAggregation::UniqueCount => "UNIQUE_COUNT",
        }
    }
}

impl fmt::Display for MeterAggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeterAggregation {
    type Err = InvalidMeter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SUM" => Ok(MeterAggregation::Sum),
            "AVG" => Ok(MeterAggregation::Avg),
            "MIN" => Ok(MeterAggregation::Min),
            "MAX" => Ok(MeterAggregation::Max),
            "COUNT" => Ok(MeterAggregation::Count),
            "UNIQUE_COUNT" => Ok(MeterAggregation::UniqueCount),
            other => Err(InvalidMeter::UnknownAggregation(other.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidMeter {
    #[error("unknown aggregation {0}")]
    UnknownAggregation(String),
    #[error("meter {0}: value property is required for {1}")]
    MissingValueProperty(String, MeterAggregation),
    #[error("meter {0}: value property must be empty for COUNT")]
    UnexpectedValueProperty(String),
    #[error("meter {slug}: {path} is not a JSON path")]
    InvalidPath { slug: String, path: String },
    #[error("meter {0}: namespace and event type are required")]
    MissingIdentity(String),
}

/// A meter as the sink sees it: enough to decide whether an event has the
/// fields the meter aggregates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterDefinition {
    pub slug: String,
    pub namespace: String,
    pub event_type: String,
    pub aggregation: MeterAggregation,
    #[serde(default)]
    pub value_property: String,
    /// Output column name to JSON path
    #[serde(default)]
    pub group_by: BTreeMap<String, String>,
}

impl MeterDefinition {
    pub fn validate(&self) -> Result<(), InvalidMeter> {
        if self.namespace.is_empty() || self.event_type.is_empty() {
            return Err(InvalidMeter::MissingIdentity(self.slug.clone()));
        }

        match (self.aggregation, self.value_property.is_empty()) {
            (MeterAggregation::Count, false) => {
                return Err(InvalidMeter::UnexpectedValueProperty(self.slug.clone()))
            }
            (aggregation, true) if aggregation != MeterAggregation::Count => {
                return Err(InvalidMeter::MissingValueProperty(
                    self.slug.clone(),
                    aggregation,
                ))
            }
            _ => {}
        }

        let paths = std::iter::once(&self.value_property)
            .filter(|p| !p.is_empty())
            .chain(self.group_by.values());
        for path in paths {
            if !path.starts_with('$') {
                return Err(InvalidMeter::InvalidPath {
                    slug: self.slug.clone(),
                    path: path.clone(),
                });
            }
        }

        Ok(())
    }

    /// COUNT meters without group-by columns never look inside the event data
    pub fn needs_event_data(&self) -> bool {
        self.aggregation != MeterAggregation::Count || !self.group_by.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meter(aggregation: MeterAggregation, value_property: &str) -> MeterDefinition {
        MeterDefinition {
            slug: "m1".to_string(),
            namespace: "default".to_string(),
            event_type: "api-calls".to_string(),
            aggregation,
            value_property: value_property.to_string(),
            group_by: BTreeMap::new(),
        }
    }

    #[test]
    fn test_value_property_required_unless_count() {
        assert!(meter(MeterAggregation::Sum, "$.duration_ms").validate().is_ok());
        assert!(meter(MeterAggregation::Count, "").validate().is_ok());

        assert_eq!(
            meter(MeterAggregation::Sum, "").validate(),
            Err(InvalidMeter::MissingValueProperty(
                "m1".to_string(),
                MeterAggregation::Sum
            ))
        );
        assert_eq!(
            meter(MeterAggregation::Count, "$.x").validate(),
            Err(InvalidMeter::UnexpectedValueProperty("m1".to_string()))
        );
    }

    #[test]
    fn test_group_by_paths_must_be_json_paths() {
        let mut m = meter(MeterAggregation::Count, "");
        m.group_by.insert("region".to_string(), "region".to_string());

        assert!(matches!(m.validate(), Err(InvalidMeter::InvalidPath { .. })));
    }

    #[test]
    fn test_aggregation_parsing() {
        assert_eq!(
            "unique_count".parse::<MeterAggregation>().unwrap(),
            MeterAggregation::UniqueCount
        );
        assert_eq!("SUM".parse::<MeterAggregation>().unwrap(), MeterAggregation::Sum);
        assert!("median".parse::<MeterAggregation>().is_err());
    }

    #[test]
    fn test_needs_event_data() {
        assert!(!meter(MeterAggregation::Count, "").needs_event_data());
        assert!(meter(MeterAggregation::Max, "$.v").needs_event_data());

        let mut grouped = meter(MeterAggregation::Count, "");
        grouped.group_by.insert("path".to_string(), "$.path".to_string());
        assert!(grouped.needs_event_data());
    }
}
