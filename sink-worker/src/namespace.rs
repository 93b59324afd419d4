use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{info, warn};

use crate::error::ProcessingError;
use crate::event::Event;
use crate::meter::MeterDefinition;
use crate::validate::validate_meter;

pub const NAMESPACE_NOT_FOUND: &str = "namespace not found";
pub const NO_MATCHING_METER: &str = "no meter found for event type";

/// What happens to an event whose type no meter in its namespace aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoMatchPolicy {
    #[default]
    Drop,
    DeadLetter,
}

#[derive(Error, Debug)]
#[error("unknown no-match policy {0}, expected drop or deadletter")]
pub struct UnknownPolicy(String);

impl FromStr for NoMatchPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop" => Ok(NoMatchPolicy::Drop),
            "deadletter" | "dead_letter" => Ok(NoMatchPolicy::DeadLetter),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

type MeterIndex = HashMap<String, Vec<MeterDefinition>>;

/// Namespace to meter index. Readers take a snapshot `Arc`; `load` builds a
/// fresh map and swaps it in, so a half-built index is never visible.
pub struct NamespaceStore {
    index: RwLock<Arc<MeterIndex>>,
    no_match_policy: NoMatchPolicy,
}

impl NamespaceStore {
    pub fn new(no_match_policy: NoMatchPolicy) -> Self {
        Self {
            index: RwLock::new(Arc::new(HashMap::new())),
            no_match_policy,
        }
    }

    fn snapshot(&self) -> Arc<MeterIndex> {
        match self.index.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the whole index. Definitions failing their sanity check are
    /// skipped. Returns the number of meters indexed.
    pub fn load(&self, meters: Vec<MeterDefinition>) -> usize {
        let mut index: MeterIndex = HashMap::new();
        let mut loaded = 0;

        for meter in meters {
            if let Err(e) = meter.validate() {
                warn!(
                    slug = %meter.slug,
                    namespace = %meter.namespace,
                    error = %e,
                    "Skipping invalid meter definition"
                );
                continue;
            }
            index.entry(meter.namespace.clone()).or_default().push(meter);
            loaded += 1;
        }

        let namespaces = index.len();
        let fresh = Arc::new(index);
        match self.index.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }

        info!(namespaces, meters = loaded, "Namespace meter index loaded");
        loaded
    }

    pub fn matching_meters(&self, namespace: &str, event_type: &str) -> Vec<MeterDefinition> {
        self.snapshot()
            .get(namespace)
            .map(|meters| {
                meters
                    .iter()
                    .filter(|m| m.event_type == event_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.snapshot().keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    /// Validates an event against every meter of its type in the namespace and
    /// reports the first failure. All matching meters are checked against one
    /// snapshot of the index.
    pub fn validate_event(&self, namespace: &str, event: &Event) -> Result<(), ProcessingError> {
        let index = self.snapshot();
        let Some(meters) = index.get(namespace) else {
            return Err(ProcessingError::drop(NAMESPACE_NOT_FOUND));
        };

        let mut matched = false;
        for meter in meters.iter().filter(|m| m.event_type == event.event_type) {
            matched = true;
            validate_meter(meter, event)?;
        }

        if matched {
            return Ok(());
        }

        match self.no_match_policy {
            NoMatchPolicy::Drop => Err(ProcessingError::drop(NO_MATCHING_METER)),
            NoMatchPolicy::DeadLetter => Err(ProcessingError::dead_letter(NO_MATCHING_METER)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::meter::MeterAggregation;

    fn meter(
        slug: &str,
        namespace: &str,
        aggregation: MeterAggregation,
        value_property: &str,
    ) -> MeterDefinition {
        MeterDefinition {
            slug: slug.to_string(),
            namespace: namespace.to_string(),
            event_type: "api-calls".to_string(),
            aggregation,
            value_property: value_property.to_string(),
            group_by: BTreeMap::new(),
        }
    }

    fn event(event_type: &str, data: &str) -> Event {
        Event {
            id: "evt".to_string(),
            event_type: event_type.to_string(),
            source: "src".to_string(),
            subject: "cust".to_string(),
            time: 0,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_load_groups_by_namespace_and_skips_invalid() {
        let store = NamespaceStore::new(NoMatchPolicy::Drop);
        let loaded = store.load(vec![
            meter("a", "default", MeterAggregation::Sum, "$.duration_ms"),
            meter("b", "other", MeterAggregation::Count, ""),
            meter("broken", "default", MeterAggregation::Max, ""),
        ]);

        assert_eq!(loaded, 2);
        assert_eq!(store.namespaces(), vec!["default", "other"]);
        assert_eq!(store.matching_meters("default", "api-calls").len(), 1);
        assert!(store.matching_meters("default", "other-type").is_empty());
        assert!(store.matching_meters("missing", "api-calls").is_empty());
    }

    #[test]
    fn test_load_replaces_previous_index() {
        let store = NamespaceStore::new(NoMatchPolicy::Drop);
        store.load(vec![meter("a", "old", MeterAggregation::Count, "")]);
        store.load(vec![meter("b", "new", MeterAggregation::Count, "")]);

        assert_eq!(store.namespaces(), vec!["new"]);
    }

    #[test]
    fn test_drop_vs_dead_letter_split() {
        let store = NamespaceStore::new(NoMatchPolicy::Drop);
        store.load(vec![meter(
            "a",
            "default",
            MeterAggregation::Sum,
            "$.duration_ms",
        )]);

        let err = store
            .validate_event("default", &event("api-calls", r#"{"duration_ms": null}"#))
            .unwrap_err();
        assert!(err.is_dead_letter());
        assert!(err.message.contains("cannot be null"));

        let err = store
            .validate_event("unregistered", &event("api-calls", r#"{"duration_ms": 1}"#))
            .unwrap_err();
        assert!(err.is_drop());
        assert!(err.message.contains("namespace not found"));
    }

    #[test]
    fn test_every_matching_meter_is_checked() {
        let store = NamespaceStore::new(NoMatchPolicy::Drop);
        store.load(vec![
            meter("a", "default", MeterAggregation::Sum, "$.duration_ms"),
            meter("b", "default", MeterAggregation::Max, "$.bytes"),
        ]);

        let err = store
            .validate_event("default", &event("api-calls", r#"{"duration_ms": 5}"#))
            .unwrap_err();

        assert!(err.is_dead_letter());
        assert_eq!(err.message, "missing value property at $.bytes");
    }

    #[test]
    fn test_no_match_policy() {
        let meters = vec![meter("a", "default", MeterAggregation::Count, "")];

        let dropping = NamespaceStore::new(NoMatchPolicy::Drop);
        dropping.load(meters.clone());
        let err = dropping
            .validate_event("default", &event("unmetered", "{}"))
            .unwrap_err();
        assert!(err.is_drop());

        let dead_lettering = NamespaceStore::new(NoMatchPolicy::DeadLetter);
        dead_lettering.load(meters);
        let err = dead_lettering
            .validate_event("default", &event("unmetered", "{}"))
            .unwrap_err();
        assert!(err.is_dead_letter());
        assert_eq!(err.message, NO_MATCHING_METER);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("drop".parse::<NoMatchPolicy>().unwrap(), NoMatchPolicy::Drop);
        assert_eq!(
            "DeadLetter".parse::<NoMatchPolicy>().unwrap(),
            NoMatchPolicy::DeadLetter
        );
        assert!("retry".parse::<NoMatchPolicy>().is_err());
    }
}
