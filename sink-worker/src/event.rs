use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One usage event as produced onto a namespace topic. `data` is itself a
/// JSON document encoded as a string; it is only parsed when a meter needs to
/// look inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(default)]
    pub subject: String,
    /// Unix milliseconds
    pub time: i64,
    #[serde(default)]
    pub data: String,
}

impl Event {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_event_payload() {
        let payload = r#"{
            "id": "evt-1",
            "type": "api-calls",
            "source": "gateway",
            "subject": "customer-1",
            "time": 1700000000000,
            "data": "{\"duration_ms\":100}"
        }"#;

        let event: Event = serde_json::from_str(payload).unwrap();

        assert_eq!(event.id, "evt-1");
        assert_eq!(event.event_type, "api-calls");
        assert_eq!(event.data, r#"{"duration_ms":100}"#);
        assert_eq!(
            event.timestamp().unwrap().to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );
    }

    #[test]
    fn test_subject_and_data_are_optional() {
        let payload = r#"{"id": "1", "type": "t", "source": "s", "time": 0}"#;
        let event: Event = serde_json::from_str(payload).unwrap();

        assert_eq!(event.subject, "");
        assert_eq!(event.data, "");
    }

    #[test]
    fn test_missing_id_fails_to_decode() {
        let payload = r#"{"type": "t", "source": "s", "time": 0}"#;
        assert!(serde_json::from_str::<Event>(payload).is_err());
    }
}
