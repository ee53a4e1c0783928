//! Consumer configuration structures

use crate::consumer::dlq::{DEFAULT_BUFFER_CAPACITY, DEFAULT_DEAD_LETTER_PATH};
use crate::consumer::message::default_topics;
use crate::consumer::processor::UnknownTopicPolicy;
use crate::consumer::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Consumer loop and message processing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Topics to consume from
    pub topics: Vec<String>,

    /// Longest wait for one poll in milliseconds
    pub poll_timeout_ms: u64,

    /// Pause after a non-connection poll error in milliseconds
    pub poll_error_pause_ms: u64,

    /// Upper bound on records returned by one poll
    pub max_poll_records: usize,

    /// Per-message retry policy
    pub retry_policy: RetryPolicy,

    /// Reconnection policy; exhausting it stops the consumer
    pub reconnect_policy: RetryPolicy,

    /// File receiving dead-letter records
    pub dead_letter_path: PathBuf,

    /// Dead-letter records mirrored in memory
    pub dead_letter_buffer_capacity: usize,

    /// Publish dead-letter records to this topic instead of the file
    pub dead_letter_topic: Option<String>,

    /// Handling of topics without a handler
    pub unknown_topic: UnknownTopicPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topics: default_topics(),
            poll_timeout_ms: 5_000,
            poll_error_pause_ms: 1_000,
            max_poll_records: 500,
            retry_policy: RetryPolicy::message_processing(),
            reconnect_policy: RetryPolicy::reconnection(),
            dead_letter_path: PathBuf::from(DEFAULT_DEAD_LETTER_PATH),
            dead_letter_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            dead_letter_topic: None,
            unknown_topic: UnknownTopicPolicy::default(),
        }
    }
}

impl ConsumerConfig {
    /// Create a new consumer config builder
    pub fn builder() -> ConsumerConfigBuilder {
        ConsumerConfigBuilder::new()
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn poll_error_pause(&self) -> Duration {
        Duration::from_millis(self.poll_error_pause_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.topics.is_empty() {
            return Err("Topics cannot be empty".to_string());
        }
        if self.topics.iter().any(|t| t.trim().is_empty()) {
            return Err("Topic names cannot be blank".to_string());
        }
        if self.poll_timeout_ms == 0 {
            return Err("Poll timeout must be greater than 0".to_string());
        }
        if self.max_poll_records == 0 {
            return Err("Max poll records must be greater than 0".to_string());
        }
        self.retry_policy
            .validate()
            .map_err(|e| format!("retry_policy: {}", e))?;
        self.reconnect_policy
            .validate()
            .map_err(|e| format!("reconnect_policy: {}", e))?;
        if self.dead_letter_topic.is_none() && self.dead_letter_path.as_os_str().is_empty() {
            return Err("A dead-letter path or topic is required".to_string());
        }
        Ok(())
    }
}

/// Builder for ConsumerConfig
#[derive(Debug, Default)]
pub struct ConsumerConfigBuilder {
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    /// Create a new consumer config builder
    pub fn new() -> Self {
        Self {
            config: ConsumerConfig::default(),
        }
    }

    /// Set the topics to consume
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.config.topics = topics;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn poll_error_pause(mut self, pause: Duration) -> Self {
        self.config.poll_error_pause_ms = pause.as_millis() as u64;
        self
    }

    pub fn max_poll_records(mut self, max: usize) -> Self {
        self.config.max_poll_records = max;
        self
    }

    /// Set the per-message retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Set the reconnection policy
    pub fn reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.reconnect_policy = policy;
        self
    }

    pub fn dead_letter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dead_letter_path = path.into();
        self
    }

    /// Set the dead letter topic
    pub fn dead_letter_topic(mut self, topic: String) -> Self {
        self.config.dead_letter_topic = Some(topic);
        self
    }

    pub fn dead_letter_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.dead_letter_buffer_capacity = capacity;
        self
    }

    pub fn unknown_topic(mut self, policy: UnknownTopicPolicy) -> Self {
        self.config.unknown_topic = policy;
        self
    }

    /// Build the consumer configuration
    pub fn build(self) -> ConsumerConfig {
        self.config
    }
}

/// Kafka client connectivity settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka broker addresses (comma-separated)
    pub brokers: String,

    /// Consumer group ID
    pub group_id: String,

    pub client_id: String,

    /// Offset reset policy (earliest, latest, none)
    pub auto_offset_reset: String,

    /// Session timeout in milliseconds
    pub session_timeout_ms: u32,

    /// Maximum poll interval in milliseconds
    pub max_poll_interval_ms: u32,

    /// Timeout for metadata and produce requests in milliseconds
    pub request_timeout_ms: u32,

    /// `PLAINTEXT` or `SSL`
    pub security_protocol: Option<String>,
    pub ssl_ca_location: Option<PathBuf>,
    pub ssl_certificate_location: Option<PathBuf>,
    pub ssl_key_location: Option<PathBuf>,

    /// Additional Kafka properties
    pub properties: HashMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "cypher-consumer-group".to_string(),
            client_id: "cypher-client".to_string(),
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 10_000,
            max_poll_interval_ms: 300_000,
            request_timeout_ms: 30_000,
            security_protocol: None,
            ssl_ca_location: None,
            ssl_certificate_location: None,
            ssl_key_location: None,
            properties: HashMap::new(),
        }
    }
}

impl KafkaConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.brokers.is_empty() {
            return Err("Brokers cannot be empty".to_string());
        }
        if self.group_id.is_empty() {
            return Err("Group ID cannot be empty".to_string());
        }
        if !matches!(
            self.auto_offset_reset.as_str(),
            "earliest" | "latest" | "none"
        ) {
            return Err(format!(
                "Invalid auto_offset_reset '{}'",
                self.auto_offset_reset
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.topics, vec!["user-actions", "recommendation-requests"]);
        assert_eq!(config.poll_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry_policy.max_retries, 3);
        assert_eq!(config.reconnect_policy.max_retries, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ConsumerConfig::builder()
            .topics(vec!["audit".to_string()])
            .poll_timeout(Duration::from_millis(250))
            .unknown_topic(UnknownTopicPolicy::Reject)
            .build();
        assert_eq!(config.topics, vec!["audit"]);
        assert_eq!(config.poll_timeout_ms, 250);
        assert_eq!(config.unknown_topic, UnknownTopicPolicy::Reject);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(ConsumerConfig::builder().topics(vec![]).build().validate().is_err());
        assert!(ConsumerConfig::builder()
            .retry_policy(RetryPolicy::fixed(0, Duration::from_secs(1)))
            .build()
            .validate()
            .is_err());

        let kafka = KafkaConfig {
            auto_offset_reset: "sometimes".into(),
            ..KafkaConfig::default()
        };
        assert!(kafka.validate().is_err());
    }
}
