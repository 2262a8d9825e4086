//! Node configuration.

use crate::consensus::RetryConfig;
use crate::decompose::EscalationPolicy;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// How conflicts spread across operations on the same key.
    pub escalation: EscalationPolicy,
    /// Retry budget for the coordinated part of a transaction.
    pub retry: RetryConfig,
}

impl NodeConfig {
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::new()
    }

    /// Load from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Builder for node configuration.
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn escalation(mut self, policy: EscalationPolicy) -> Self {
        self.config.escalation = policy;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry.max_backoff = backoff;
        self
    }

    pub fn max_redirects(mut self, redirects: u32) -> Self {
        self.config.retry.max_redirects = redirects;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = NodeConfig::builder()
            .escalation(EscalationPolicy::ConflictingPairs)
            .max_retries(1)
            .initial_backoff(Duration::from_millis(5))
            .build();

        assert_eq!(config.escalation, EscalationPolicy::ConflictingPairs);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(5));
        assert_eq!(config.retry.max_redirects, RetryConfig::default().max_redirects);
    }

    #[test]
    fn test_json_fills_missing_fields() {
        let config =
            NodeConfig::from_json(r#"{"escalation": "conflicting_pairs", "retry": {"max_retries": 9}}"#)
                .unwrap();
        assert_eq!(config.escalation, EscalationPolicy::ConflictingPairs);
        assert_eq!(config.retry.max_retries, 9);
        assert_eq!(config.retry.backoff_multiplier, 2.0);

        assert_eq!(NodeConfig::from_json("{}").unwrap(), NodeConfig::default());
    }
}
