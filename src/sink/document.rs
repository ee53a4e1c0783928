//! Documents written to the observability sink

use crate::consumer::message::Message;
use crate::monitor::status::ServiceCheckResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Index receiving message lifecycle events
pub const MESSAGES_INDEX: &str = "cypher-messages";

/// Index receiving monitor snapshots
pub const MONITOR_INDEX: &str = "cypher-monitor";

/// Stage of a message's processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageEventKind {
    /// An attempt is starting
    KafkaMessageReceived,
    /// The handler succeeded
    KafkaMessageProcessed,
    /// The message was dead-lettered
    KafkaMessageFailed,
}

/// Status recorded with a lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    /// Attempt in progress
    Processing,
    /// Processed successfully
    Completed,
    /// Permanently failed
    Error,
}

/// One stage of a message's lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Stage keyword
    pub message_type: MessageEventKind,
    /// Stringified payload
    pub content: String,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Outcome so far
    pub status: LifecycleStatus,
    /// Free-form details (topic, partition, offset, retry count...)
    pub metadata: Map<String, Value>,
}

impl LifecycleEvent {
    fn for_message(
        message: &Message,
        message_type: MessageEventKind,
        status: LifecycleStatus,
    ) -> Self {
        let mut metadata = Map::new();
        metadata.insert("topic".into(), json!(message.topic));
        metadata.insert("partition".into(), json!(message.partition));
        metadata.insert("offset".into(), json!(message.offset));
        Self {
            message_type,
            content: message.value.to_string(),
            timestamp: Utc::now(),
            status,
            metadata,
        }
    }

    /// An attempt is about to run
    pub fn received(message: &Message, retry_count: u32) -> Self {
        let mut event = Self::for_message(
            message,
            MessageEventKind::KafkaMessageReceived,
            LifecycleStatus::Processing,
        );
        event
            .metadata
            .insert("retry_count".into(), json!(retry_count));
        event
    }

    /// The handler succeeded after `processing_ms`
    pub fn processed(message: &Message, processing_ms: f64) -> Self {
        let mut event = Self::for_message(
            message,
            MessageEventKind::KafkaMessageProcessed,
            LifecycleStatus::Completed,
        );
        let end_to_end_ms = (Utc::now() - message.timestamp).num_milliseconds();
        event
            .metadata
            .insert("processing_time_ms".into(), json!(processing_ms));
        event
            .metadata
            .insert("end_to_end_ms".into(), json!(end_to_end_ms));
        event
    }

    /// The message was dead-lettered after `retries` attempts
    pub fn failed(message: &Message, error: &str, retries: u32) -> Self {
        let mut event = Self::for_message(
            message,
            MessageEventKind::KafkaMessageFailed,
            LifecycleStatus::Error,
        );
        event.metadata.insert("error".into(), json!(error));
        event.metadata.insert("retries".into(), json!(retries));
        event.metadata.insert("dead_letter".into(), json!(true));
        event
    }
}

/// One monitor poll cycle as persisted in the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorDocument {
    /// Always `service_status`
    pub monitor_type: String,
    /// When the cycle ran
    pub timestamp: DateTime<Utc>,
    /// Per-service results
    pub status: BTreeMap<String, ServiceCheckResult>,
    /// Rendered anomaly diagnostics
    pub anomalies: Vec<String>,
    /// Source and version tags
    pub metadata: Map<String, Value>,
}

impl MonitorDocument {
    /// Build a snapshot document
    pub fn new(
        status: BTreeMap<String, ServiceCheckResult>,
        anomalies: Vec<String>,
        source: &str,
        version: &str,
    ) -> Self {
        let mut metadata = Map::new();
        metadata.insert("source".into(), json!(source));
        metadata.insert("version".into(), json!(version));
        Self {
            monitor_type: "service_status".to_string(),
            timestamp: Utc::now(),
            status,
            anomalies,
            metadata,
        }
    }

    /// Mappings for the monitor index
    pub fn mappings() -> Value {
        json!({
            "properties": {
                "monitor_type": {"type": "keyword"},
                "timestamp": {"type": "date"},
                "status": {"type": "object", "enabled": true},
                "anomalies": {"type": "text"},
                "metadata": {"type": "object"}
            }
        })
    }
}
