//! Kafka event log client built on rdkafka

use crate::consumer::config::KafkaConfig;
use crate::consumer::error::BrokerError;
use crate::consumer::log::{EventLog, Subscription};
use crate::consumer::message::Message;
use crate::monitor::probe::{EventLogAdmin, ProbeError};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use std::future::Future;
use tracing::{debug, info, warn};

/// Extra client properties accepted from configuration
const ALLOWED_KAFKA_PROPS: &[&str] = &[
    // Compression settings
    "compression.type",
    "compression.level",
    // Fetch settings
    "fetch.min.bytes",
    "fetch.max.wait.ms",
    "fetch.max.bytes",
    "max.partition.fetch.bytes",
    // Request settings
    "metadata.max.age.ms",
    "receive.buffer.bytes",
    "send.buffer.bytes",
    // Connection settings
    "reconnect.backoff.ms",
    "reconnect.backoff.max.ms",
    "connections.max.idle.ms",
    "socket.keepalive.enable",
    "heartbeat.interval.ms",
    // Monitoring
    "statistics.interval.ms",
];

/// Records drained from the client queue after the first one arrives
const DRAIN_WAIT: Duration = Duration::from_millis(10);

/// Event log backed by a Kafka cluster
#[derive(Clone)]
pub struct KafkaEventLog {
    config: KafkaConfig,
    producer: Arc<FutureProducer>,
    max_poll_records: usize,
}

impl KafkaEventLog {
    /// Create a client; the consumer itself is created on every subscribe
    pub fn new(config: KafkaConfig, max_poll_records: usize) -> Result<Self, BrokerError> {
        let producer: FutureProducer = Self::base_config(&config)?
            .set("message.timeout.ms", config.request_timeout_ms.to_string())
            .create()?;
        info!(brokers = %config.brokers, "Kafka client created");
        Ok(Self {
            config,
            producer: Arc::new(producer),
            max_poll_records: max_poll_records.max(1),
        })
    }

    /// Producer shared with the dead-letter store
    pub fn producer(&self) -> FutureProducer {
        self.producer.as_ref().clone()
    }

    fn base_config(config: &KafkaConfig) -> Result<ClientConfig, BrokerError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("request.timeout.ms", config.request_timeout_ms.to_string());

        if let Some(protocol) = &config.security_protocol {
            client_config.set("security.protocol", protocol);
        }
        for (key, path) in [
            ("ssl.ca.location", &config.ssl_ca_location),
            ("ssl.certificate.location", &config.ssl_certificate_location),
            ("ssl.key.location", &config.ssl_key_location),
        ] {
            if let Some(path) = path {
                client_config.set(key, path.to_string_lossy());
            }
        }

        // Add custom properties with validation
        for (key, value) in &config.properties {
            if !ALLOWED_KAFKA_PROPS.contains(&key.as_str()) {
                return Err(BrokerError::Other(format!(
                    "Disallowed Kafka property '{}'. Allowed properties: {:?}",
                    key, ALLOWED_KAFKA_PROPS
                )));
            }
            client_config.set(key, value);
        }
        Ok(client_config)
    }

    fn create_consumer(&self) -> Result<StreamConsumer, BrokerError> {
        let consumer: StreamConsumer = Self::base_config(&self.config)?
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set("session.timeout.ms", self.config.session_timeout_ms.to_string())
            .set(
                "max.poll.interval.ms",
                self.config.max_poll_interval_ms.to_string(),
            )
            .create()?;
        Ok(consumer)
    }
}

#[async_trait]
impl EventLog for KafkaEventLog {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &Value,
    ) -> Result<(i32, i64), BrokerError> {
        let payload =
            serde_json::to_vec(value).map_err(|e| BrokerError::Publish(e.to_string()))?;
        let mut record = FutureRecord::to(topic).payload(&payload);
        if let Some(key) = key {
            record = record.key(key);
        }
        let timeout = Duration::from_millis(u64::from(self.config.request_timeout_ms));
        self.producer
            .send(record, timeout)
            .await
            .map_err(|(e, _)| BrokerError::from(e))
    }

    async fn subscribe(&self, topics: &[String]) -> Result<Box<dyn Subscription>, BrokerError> {
        let consumer = self.create_consumer()?;
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs)?;

        // Fail fast when no broker answers
        let consumer = Arc::new(consumer);
        let probe = consumer.clone();
        let timeout = Duration::from_millis(u64::from(self.config.request_timeout_ms));
        tokio::task::spawn_blocking(move || probe.fetch_metadata(None, timeout))
            .await
            .map_err(|e| BrokerError::Other(e.to_string()))??;

        Ok(Box::new(KafkaSubscription {
            consumer,
            max_poll_records: self.max_poll_records,
        }))
    }
}

#[async_trait]
impl EventLogAdmin for KafkaEventLog {
    async fn list_topics(&self) -> Result<Vec<String>, ProbeError> {
        let consumer = self
            .create_consumer()
            .map_err(|e| ProbeError::Failed(e.to_string()))?;
        let timeout = Duration::from_millis(u64::from(self.config.request_timeout_ms));
        let metadata = tokio::task::spawn_blocking(move || consumer.fetch_metadata(None, timeout))
            .await
            .map_err(|e| ProbeError::Failed(e.to_string()))?
            .map_err(|e| ProbeError::Failed(e.to_string()))?;
        let mut topics: Vec<String> = metadata
            .topics()
            .iter()
            .map(|t| t.name().to_string())
            .filter(|name| !name.starts_with("__"))
            .collect();
        topics.sort();
        Ok(topics)
    }
}

fn to_message(received: KafkaResult<BorrowedMessage<'_>>) -> Result<Message, BrokerError> {
    Ok(Message::from_kafka(&received?))
}

/// Extend a batch started by `first` until `next` runs dry, fails or the
/// batch is full. A receive error keeps the messages taken so far.
async fn drain_batch<F, Fut>(first: Message, max_records: usize, mut next: F) -> Vec<Message>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<Result<Message, BrokerError>>>,
{
    let mut batch = vec![first];
    while batch.len() < max_records {
        match next().await {
            Some(Ok(message)) => batch.push(message),
            Some(Err(err)) => {
                warn!(error = %err, records = batch.len(), "receive failed mid-batch");
                break;
            }
            None => break,
        }
    }
    batch
}

/// Subscription over a Kafka consumer group
pub struct KafkaSubscription {
    consumer: Arc<StreamConsumer>,
    max_poll_records: usize,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Message>, BrokerError> {
        let first = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(received) => to_message(received)?,
        };
        let consumer = self.consumer.clone();
        let mut batch = drain_batch(first, self.max_poll_records, || {
            let consumer = consumer.clone();
            async move {
                match tokio::time::timeout(DRAIN_WAIT, consumer.recv()).await {
                    Ok(received) => Some(to_message(received)),
                    Err(_) => None,
                }
            }
        })
        .await;

        // Group by partition; offsets are already increasing within each one
        batch.sort_by(|a, b| {
            (a.topic.as_str(), a.partition, a.offset).cmp(&(b.topic.as_str(), b.partition, b.offset))
        });
        debug!(records = batch.len(), "polled batch");
        Ok(batch)
    }

    async fn commit(&mut self, message: &Message) -> Result<(), BrokerError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&message.topic, message.partition, Offset::Offset(message.offset + 1))
            .map_err(|e| BrokerError::Commit(e.to_string()))?;
        self.consumer.commit(&tpl, CommitMode::Sync)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};

    fn message_at(offset: i64) -> Message {
        Message::new(
            "user-actions",
            0,
            offset,
            serde_json::json!({"n": offset}),
            chrono::Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_receive_error_keeps_drained_messages() {
        let mut script: VecDeque<Option<Result<Message, BrokerError>>> = VecDeque::from(vec![
            Some(Ok(message_at(11))),
            Some(Err(BrokerError::Timeout("request timed out".to_string()))),
            Some(Ok(message_at(12))),
        ]);
        let batch = drain_batch(message_at(10), 10, || {
            let item = script.pop_front().flatten();
            async move { item }
        })
        .await;

        let offsets: Vec<i64> = batch.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![10, 11]);
        assert_eq!(script.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_stops_at_batch_size() {
        let mut next_offset = 1;
        let batch = drain_batch(message_at(0), 3, || {
            let message = message_at(next_offset);
            next_offset += 1;
            async move { Some(Ok(message)) }
        })
        .await;
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_disallowed_property_is_rejected() {
        let config = KafkaConfig {
            properties: HashMap::from([("sasl.password".to_string(), "secret".to_string())]),
            ..KafkaConfig::default()
        };
        let err = KafkaEventLog::base_config(&config).unwrap_err();
        assert!(err.to_string().contains("Disallowed Kafka property 'sasl.password'"));
    }

    #[test]
    fn test_ssl_settings_are_applied() {
        let config = KafkaConfig {
            security_protocol: Some("SSL".into()),
            ssl_ca_location: Some("ca.pem".into()),
            properties: HashMap::from([("fetch.min.bytes".to_string(), "1".to_string())]),
            ..KafkaConfig::default()
        };
        let client_config = KafkaEventLog::base_config(&config).unwrap();
        assert_eq!(client_config.get("security.protocol"), Some("SSL"));
        assert_eq!(client_config.get("ssl.ca.location"), Some("ca.pem"));
        assert_eq!(client_config.get("fetch.min.bytes"), Some("1"));
    }
}
