//! Pipeline configuration
//!
//! Loaded from YAML, then overridden from `CYPHER_*` environment variables,
//! then validated. Every section has defaults, so an empty file is valid.

use crate::consumer::config::{ConsumerConfig, KafkaConfig};
use crate::error::{PipelineError, Result};
use crate::monitor::anomaly::AnomalyDetector;
use crate::monitor::probe::DEFAULT_CHECK_TIMEOUT;
use crate::monitor::window::DEFAULT_WINDOW_CAPACITY;
use crate::sink::{DEFAULT_QUERY_SIZE, MESSAGES_INDEX, MONITOR_INDEX};
use crate::telemetry::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Service monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between check cycles
    pub interval_secs: u64,
    /// Snapshots kept for trend analysis
    pub window_capacity: usize,
    /// Longest a single service check may take, in milliseconds
    pub check_timeout_ms: u64,
    pub anomaly: AnomalyDetector,
    /// Documents returned by a log query
    pub log_query_size: usize,
    /// `metadata.source` of persisted snapshots
    pub source: String,
    /// `metadata.version` of persisted snapshots
    pub version: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            check_timeout_ms: DEFAULT_CHECK_TIMEOUT.as_millis() as u64,
            anomaly: AnomalyDetector::default(),
            log_query_size: DEFAULT_QUERY_SIZE,
            source: "cypher-monitor".to_string(),
            version: "2.0".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.window_capacity == 0 {
            return Err("Window capacity must be greater than 0".to_string());
        }
        if self.interval_secs == 0 {
            return Err("Monitor interval must be greater than 0".to_string());
        }
        if self.check_timeout_ms == 0 {
            return Err("Check timeout must be greater than 0".to_string());
        }
        if self.anomaly.baseline_len == 0 {
            return Err("Anomaly baseline length must be greater than 0".to_string());
        }
        if !self.anomaly.spike_factor.is_finite() || self.anomaly.spike_factor <= 1.0 {
            return Err("Spike factor must be finite and greater than 1.0".to_string());
        }
        Ok(())
    }
}

/// Observability sink connection
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Base URL; no sink is used when unset
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sent as `Authorization: ApiKey <key>`; takes precedence over basic auth
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    /// Index receiving message lifecycle events
    pub messages_index: String,
    /// Index receiving monitor snapshots
    pub monitor_index: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            api_key: None,
            request_timeout_ms: 10_000,
            messages_index: MESSAGES_INDEX.to_string(),
            monitor_index: MONITOR_INDEX.to_string(),
        }
    }
}

// Credentials stay out of logs
impl std::fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("messages_index", &self.messages_index)
            .field("monitor_index", &self.monitor_index)
            .finish()
    }
}

/// Complete configuration of the binary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub consumer: ConsumerConfig,
    pub monitor: MonitorConfig,
    pub sink: SinkConfig,
    pub kafka: KafkaConfig,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Parse YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&contents)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Defaults or file, then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override settings from `CYPHER_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override settings from `lookup`, which maps variable names to values
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(brokers) = lookup("CYPHER_KAFKA_BROKERS") {
            self.kafka.brokers = brokers;
        }
        if let Some(group_id) = lookup("CYPHER_KAFKA_GROUP_ID") {
            self.kafka.group_id = group_id;
        }
        if let Some(url) = lookup("CYPHER_SINK_URL") {
            self.sink.url = Some(url);
        }
        if let Some(username) = lookup("CYPHER_SINK_USERNAME") {
            self.sink.username = Some(username);
        }
        if let Some(password) = lookup("CYPHER_SINK_PASSWORD") {
            self.sink.password = Some(password);
        }
        if let Some(api_key) = lookup("CYPHER_SINK_API_KEY") {
            self.sink.api_key = Some(api_key);
        }
        if let Some(path) = lookup("CYPHER_DEAD_LETTER_PATH") {
            self.consumer.dead_letter_path = PathBuf::from(path);
        }
        if let Some(level) = lookup("CYPHER_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        self.consumer
            .validate()
            .map_err(|e| PipelineError::Config(format!("consumer: {}", e)))?;
        self.monitor
            .validate()
            .map_err(|e| PipelineError::Config(format!("monitor: {}", e)))?;
        self.kafka
            .validate()
            .map_err(|e| PipelineError::Config(format!("kafka: {}", e)))?;
        if let Some(url) = &self.sink.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(PipelineError::Config(format!(
                    "sink: url '{}' must start with http:// or https://",
                    url
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::processor::UnknownTopicPolicy;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_empty_yaml_is_default() {
        let config = PipelineConfig::from_yaml("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
consumer:
  topics: [user-actions]
  unknown_topic: reject
  retry_policy:
    max_retries: 4
    initial_backoff_ms: 500
    max_backoff_ms: 10000
    backoff_multiplier: 2.0
monitor:
  interval_secs: 60
sink:
  url: http://localhost:9200
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.consumer.topics, vec!["user-actions"]);
        assert_eq!(config.consumer.unknown_topic, UnknownTopicPolicy::Reject);
        assert_eq!(config.consumer.retry_policy.max_retries, 4);
        assert_eq!(config.consumer.reconnect_policy.max_retries, 5);
        assert_eq!(config.monitor.interval(), Duration::from_secs(60));
        assert_eq!(config.monitor.window_capacity, 10);
        assert_eq!(config.sink.url.as_deref(), Some("http://localhost:9200"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_retry_policy_is_rejected() {
        let yaml = r#"
consumer:
  retry_policy:
    max_retries: 3
    initial_backoff_ms: 1000
    max_backoff_ms: 30000
    backoff_multiplier: 500.0
"#;
        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(PipelineError::Yaml(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CYPHER_KAFKA_BROKERS", "broker-1:9093"),
            ("CYPHER_SINK_URL", "https://search.internal:9200"),
            ("CYPHER_SINK_PASSWORD", "hunter2"),
            ("CYPHER_DEAD_LETTER_PATH", "/var/log/cypher/dead.log"),
            ("CYPHER_LOG_LEVEL", "debug"),
            ("CYPHER_KAFKA_GROUP_ID", ""),
        ]);
        let mut config = PipelineConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.kafka.brokers, "broker-1:9093");
        assert_eq!(config.kafka.group_id, "cypher-consumer-group");
        assert_eq!(config.sink.url.as_deref(), Some("https://search.internal:9200"));
        assert_eq!(
            config.consumer.dead_letter_path,
            PathBuf::from("/var/log/cypher/dead.log")
        );
        assert_eq!(config.logging.level, "debug");
        assert!(!format!("{:?}", config.sink).contains("hunter2"));
    }

    #[test]
    fn test_validation() {
        let mut config = PipelineConfig::default();
        config.consumer.topics.clear();
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = PipelineConfig::default();
        config.monitor.window_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.monitor.anomaly.baseline_len = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.consumer.retry_policy.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.sink.url = Some("localhost:9200".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cypher.yaml");
        std::fs::write(&path, "kafka:\n  brokers: kafka:9092\n").unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.kafka.brokers, "kafka:9092");

        assert!(matches!(
            PipelineConfig::from_file(dir.path().join("missing.yaml")),
            Err(PipelineError::Io(_))
        ));
    }
}
