//! Common types for the generator

use serde::{Deserialize, Serialize};

/// What to do with records the stream refused or never received.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum FailurePolicy {
    /// Report the failure and move on. Records are delivered at most once.
    #[default]
    Drop,
    /// Resubmit only the failed records, admitting them against the throttle
    /// again, until they are accepted or attempts run out.
    Retry {
        /// Resubmissions made per dispatched batch before giving up
        max_attempts: u32,
        /// Pause before each resubmission, in milliseconds
        backoff_millis: u64,
    },
}

/// Builder for consistent metric labels across the generator
pub(crate) struct MetricsBuilder {
    labels: Vec<(String, String)>,
}

impl MetricsBuilder {
    /// Create a new metrics builder with standard component labels
    pub(crate) fn new(component_name: &str) -> Self {
        Self {
            labels: vec![
                ("component".to_string(), "generator".to_string()),
                ("component_name".to_string(), component_name.to_string()),
            ],
        }
    }

    /// Add an ID label if provided
    pub(crate) fn with_id(mut self, id: Option<String>) -> Self {
        if let Some(id) = id {
            self.labels.push(("id".to_string(), id));
        }
        self
    }

    /// Build the final label vector
    pub(crate) fn build(self) -> Vec<(String, String)> {
        self.labels
    }
}

#[cfg(test)]
mod test {
    use super::{FailurePolicy, MetricsBuilder};

    #[test]
    fn failure_policy_deserializes() {
        let drop: FailurePolicy = serde_yaml::from_str("drop").unwrap();
        assert_eq!(drop, FailurePolicy::Drop);
        let retry: FailurePolicy = serde_yaml::with::singleton_map_recursive::deserialize(
            serde_yaml::Deserializer::from_str("retry:\n  max_attempts: 3\n  backoff_millis: 100\n"),
        )
        .unwrap();
        assert_eq!(
            retry,
            FailurePolicy::Retry {
                max_attempts: 3,
                backoff_millis: 100
            }
        );
    }

    #[test]
    fn labels_include_id_when_given() {
        let labels = MetricsBuilder::new("kinesis")
            .with_id(Some("lb".to_string()))
            .build();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[2], ("id".to_string(), "lb".to_string()));
        assert_eq!(MetricsBuilder::new("kinesis").with_id(None).build().len(), 2);
    }
}
