//! Messages read from the event log

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic carrying user interaction events
pub const USER_ACTIONS_TOPIC: &str = "user-actions";

/// Topic carrying recommendation requests
pub const RECOMMENDATION_REQUESTS_TOPIC: &str = "recommendation-requests";

/// Topics the consumer subscribes to unless configured otherwise
pub fn default_topics() -> Vec<String> {
    vec![
        USER_ACTIONS_TOPIC.to_string(),
        RECOMMENDATION_REQUESTS_TOPIC.to_string(),
    ]
}

/// An immutable record read from one partition of the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Topic the record was read from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Position within the partition
    pub offset: i64,
    /// Structured payload, opaque to the pipeline
    pub value: Value,
    /// Producer-assigned time
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        value: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            value,
            timestamp,
        }
    }

    /// The `type` discriminator of the payload, if any
    pub fn event_type(&self) -> Option<&str> {
        self.value.get("type").and_then(Value::as_str)
    }

    /// The `data` object of the payload, if any
    pub fn data(&self) -> Option<&serde_json::Map<String, Value>> {
        self.value.get("data").and_then(Value::as_object)
    }

    /// Decode a broker payload.
    ///
    /// JSON payloads are kept structured; anything else is carried as a JSON
    /// string so it can still be dead-lettered verbatim.
    pub fn decode_payload(payload: Option<&[u8]>) -> Value {
        match payload {
            None => Value::Null,
            Some(bytes) => serde_json::from_slice(bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
        }
    }

    /// Convert a broker timestamp in epoch milliseconds
    pub fn timestamp_from_millis(millis: Option<i64>) -> DateTime<Utc> {
        millis
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now)
    }

    /// Build a message from an rdkafka record
    #[cfg(feature = "kafka")]
    pub fn from_kafka<M: rdkafka::Message>(message: &M) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            value: Self::decode_payload(message.payload()),
            timestamp: Self::timestamp_from_millis(message.timestamp().to_millis()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_accessors() {
        let message = Message::new(
            USER_ACTIONS_TOPIC,
            0,
            7,
            json!({"type": "click", "data": {"user_id": 42}}),
            Utc::now(),
        );
        assert_eq!(message.event_type(), Some("click"));
        assert_eq!(message.data().and_then(|d| d.get("user_id")), Some(&json!(42)));
    }

    #[test]
    fn test_decode_non_json_payload() {
        assert_eq!(
            Message::decode_payload(Some(b"not json")),
            Value::String("not json".into())
        );
        assert_eq!(Message::decode_payload(Some(br#"{"a":1}"#)), json!({"a": 1}));
        assert_eq!(Message::decode_payload(None), Value::Null);
    }

    #[test]
    fn test_timestamp_from_millis() {
        let ts = Message::timestamp_from_millis(Some(1_700_000_000_000));
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }
}
