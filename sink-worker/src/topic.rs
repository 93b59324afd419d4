use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::metrics_consts::UNROUTABLE_NAMESPACES;

const NAMESPACE_PLACEHOLDER: &str = "{namespace}";
const SAMPLE_NAMESPACE: &str = "sample_ns_01";

#[derive(Error, Debug)]
pub enum TopicNamingError {
    #[error("topic template {0} has no {{namespace}} placeholder")]
    MissingPlaceholder(String),
    #[error("invalid namespace topic pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("namespace topic pattern {0} has no capture group")]
    MissingCaptureGroup(String),
    #[error("topic {topic} rendered from template is not matched back by pattern {pattern}")]
    Inconsistent { topic: String, pattern: String },
}

/// Maps namespaces to source and dead-letter topic names and back. The template
/// and the pattern must agree; this is checked once on construction.
#[derive(Debug, Clone)]
pub struct NamespaceTopics {
    template: String,
    pattern: Regex,
    dead_letter_template: String,
}

impl NamespaceTopics {
    pub fn new(
        template: &str,
        pattern: &str,
        dead_letter_template: &str,
    ) -> Result<Self, TopicNamingError> {
        for t in [template, dead_letter_template] {
            if !t.contains(NAMESPACE_PLACEHOLDER) {
                return Err(TopicNamingError::MissingPlaceholder(t.to_string()));
            }
        }

        let pattern = Regex::new(pattern)?;
        if pattern.captures_len() < 2 {
            return Err(TopicNamingError::MissingCaptureGroup(
                pattern.as_str().to_string(),
            ));
        }

        let topics = Self {
            template: template.to_string(),
            pattern,
            dead_letter_template: dead_letter_template.to_string(),
        };

        let sample = topics.topic_for(SAMPLE_NAMESPACE);
        if topics.namespace_from_topic(&sample) != Some(SAMPLE_NAMESPACE) {
            return Err(TopicNamingError::Inconsistent {
                topic: sample,
                pattern: topics.pattern.as_str().to_string(),
            });
        }

        Ok(topics)
    }

    pub fn namespace_from_topic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(topic)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|ns| !ns.is_empty())
    }

    pub fn topic_for(&self, namespace: &str) -> String {
        self.template.replace(NAMESPACE_PLACEHOLDER, namespace)
    }

    pub fn dead_letter_topic(&self, namespace: &str) -> String {
        self.dead_letter_template
            .replace(NAMESPACE_PLACEHOLDER, namespace)
    }

    /// True when the namespace's topic resolves back to the same namespace
    pub fn is_routable(&self, namespace: &str) -> bool {
        self.namespace_from_topic(&self.topic_for(namespace)) == Some(namespace)
    }

    /// Full subscription set for the given namespaces, sorted and deduplicated.
    /// Namespaces whose topic cannot be resolved back are left out: every event
    /// polled from such a topic would be dropped.
    pub fn subscription_topics<'a>(
        &self,
        namespaces: impl IntoIterator<Item = &'a str>,
    ) -> Vec<String> {
        let mut topics: Vec<String> = namespaces
            .into_iter()
            .filter(|ns| {
                let routable = self.is_routable(ns);
                if !routable {
                    warn!(
                        namespace = %ns,
                        topic = %self.topic_for(ns),
                        "Namespace topic does not match the topic pattern, not subscribing"
                    );
                    metrics::counter!(UNROUTABLE_NAMESPACES).increment(1);
                }
                routable
            })
            .map(|ns| self.topic_for(ns))
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> NamespaceTopics {
        NamespaceTopics::new(
            "om_{namespace}_events",
            "^om_([A-Za-z0-9_]+)_events$",
            "om_{namespace}_events_deadletter",
        )
        .unwrap()
    }

    #[test]
    fn test_namespace_round_trip() {
        let t = topics();

        assert_eq!(t.topic_for("default"), "om_default_events");
        assert_eq!(t.namespace_from_topic("om_default_events"), Some("default"));
        assert_eq!(
            t.dead_letter_topic("default"),
            "om_default_events_deadletter"
        );
    }

    #[test]
    fn test_foreign_topics_do_not_resolve() {
        let t = topics();

        assert_eq!(t.namespace_from_topic("events"), None);
        assert_eq!(t.namespace_from_topic("om__events"), None);
        assert_eq!(t.namespace_from_topic("om_default_events_deadletter"), None);
    }

    #[test]
    fn test_subscription_topics_are_sorted_and_unique() {
        let t = topics();
        let subs = t.subscription_topics(["b", "a", "b"]);

        assert_eq!(subs, vec!["om_a_events", "om_b_events"]);
    }

    #[test]
    fn test_unroutable_namespaces_are_not_subscribed() {
        let t = topics();

        assert!(t.is_routable("acme_corp"));
        assert!(!t.is_routable("acme-corp"));
        assert_eq!(
            t.subscription_topics(["acme-corp", "default"]),
            vec!["om_default_events"]
        );
    }

    #[test]
    fn test_inconsistent_template_and_pattern_rejected() {
        let err = NamespaceTopics::new(
            "events_{namespace}",
            "^om_([A-Za-z0-9_]+)_events$",
            "{namespace}_dlq",
        )
        .unwrap_err();
        assert!(matches!(err, TopicNamingError::Inconsistent { .. }));

        let err = NamespaceTopics::new("om_events", "^om_(.+)$", "{namespace}_dlq").unwrap_err();
        assert!(matches!(err, TopicNamingError::MissingPlaceholder(_)));

        let err =
            NamespaceTopics::new("om_{namespace}", "^om_.+$", "{namespace}_dlq").unwrap_err();
        assert!(matches!(err, TopicNamingError::MissingCaptureGroup(_)));
    }
}
