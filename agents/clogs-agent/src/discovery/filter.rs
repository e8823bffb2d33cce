//! Tag Filter
//!
//! Decides which containers belong to the monitored set based on label
//! predicates of the form `key` or `key=value`.

use std::collections::HashMap;

use crate::runtime::adapter::ContainerInfo;

/// A single label predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPredicate {
    pub key: String,
    pub value: Option<String>,
}

impl TagPredicate {
    /// Parse `key` or `key=value`. Only the first `=` separates.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('=') {
            Some((key, value)) => Self {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
            None => Self {
                key: raw.to_string(),
                value: None,
            },
        }
    }

    /// The key must be present and, when a value is given, equal to it
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match (labels.get(&self.key), &self.value) {
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected,
            (None, _) => false,
        }
    }
}

/// Monitored-set membership by labels
#[derive(Debug, Clone)]
pub struct TagFilter {
    monitoring_tag: TagPredicate,
    explicit: Option<Vec<TagPredicate>>,
}

impl TagFilter {
    /// `monitoring_tag` is the built-in label probed when no explicit
    /// predicates are configured. An explicit empty list monitors everything.
    pub fn new(monitoring_tag: &str, explicit: Option<&[String]>) -> Self {
        Self {
            monitoring_tag: TagPredicate::parse(monitoring_tag),
            explicit: explicit.map(|raw| raw.iter().map(|p| TagPredicate::parse(p)).collect()),
        }
    }

    /// Predicates in force for this container set; `None` admits everything
    fn active_predicates(&self, containers: &[ContainerInfo]) -> Option<Vec<TagPredicate>> {
        match &self.explicit {
            Some(predicates) if predicates.is_empty() => None,
            Some(predicates) => Some(predicates.clone()),
            None => containers
                .iter()
                .any(|c| self.monitoring_tag.matches(&c.labels))
                .then(|| vec![self.monitoring_tag.clone()]),
        }
    }

    /// Keep containers matching at least one active predicate.
    ///
    /// Labels can change after creation, so callers pass freshly refreshed
    /// container attributes.
    pub fn apply(&self, containers: Vec<ContainerInfo>) -> Vec<ContainerInfo> {
        match self.active_predicates(&containers) {
            None => containers,
            Some(predicates) => containers
                .into_iter()
                .filter(|c| predicates.iter().any(|p| p.matches(&c.labels)))
                .collect(),
        }
    }
}
