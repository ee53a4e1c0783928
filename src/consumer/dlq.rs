//! Dead-letter handling for messages that exhausted their retries

use crate::consumer::message::Message;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Default location of the file-backed store
pub const DEFAULT_DEAD_LETTER_PATH: &str = "kafka_dead_letter.log";

/// Default capacity of the in-memory mirror
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// A permanently failed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Payload as it was read from the log
    pub original_message: Value,
    /// Source topic
    pub topic: String,
    /// Source partition
    pub partition: i32,
    /// Source offset
    pub offset: i64,
    /// Last handler error
    pub error: String,
    /// When the record was created
    pub timestamp: DateTime<Utc>,
    /// Always true for records on this path
    pub retries_exhausted: bool,
}

impl DeadLetterRecord {
    /// Build a record for `message` failing with `error`
    pub fn from_failure(message: &Message, error: impl std::fmt::Display) -> Self {
        Self {
            original_message: message.value.clone(),
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            error: error.to_string(),
            timestamp: Utc::now(),
            retries_exhausted: true,
        }
    }
}

/// Durable append target for dead-letter records
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Append one record
    async fn append(&self, record: &DeadLetterRecord) -> Result<()>;
}

/// Newline-delimited JSON file store
#[derive(Debug)]
pub struct FileDeadLetterStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileDeadLetterStore {
    /// Create a store appending to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every record; a missing file is an empty store
    pub async fn read_all(&self) -> Result<Vec<DeadLetterRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(PipelineError::from))
            .collect()
    }
}

#[async_trait]
impl DeadLetterStore for FileDeadLetterStore {
    async fn append(&self, record: &DeadLetterRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        debug!(
            path = %self.path.display(),
            topic = %record.topic,
            offset = record.offset,
            "dead-letter record appended"
        );
        Ok(())
    }
}

/// Bounded in-memory mirror of the most recent dead-letter records
#[derive(Debug)]
pub struct DeadLetterBuffer {
    capacity: usize,
    records: Mutex<VecDeque<DeadLetterRecord>>,
}

impl Default for DeadLetterBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl DeadLetterBuffer {
    /// Create a buffer keeping at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Store a record, evicting the oldest when full
    pub fn push(&self, record: DeadLetterRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Records oldest first
    pub fn snapshot(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Number of buffered records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Maximum number of records kept
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(feature = "kafka")]
pub use self::kafka::KafkaDeadLetterStore;

#[cfg(feature = "kafka")]
mod kafka {
    use super::{DeadLetterRecord, DeadLetterStore};
    use crate::consumer::error::BrokerError;
    use crate::error::{PipelineError, Result};
    use async_trait::async_trait;
    use rdkafka::message::{Header, OwnedHeaders};
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use std::sync::Arc;
    use std::time::Duration;
    use tracing::{debug, error};

    /// Publishes dead-letter records to a topic with provenance headers
    #[derive(Clone)]
    pub struct KafkaDeadLetterStore {
        producer: Arc<FutureProducer>,
        topic: String,
        timeout: Duration,
    }

    impl KafkaDeadLetterStore {
        /// Create a store producing to `topic`
        pub fn new(producer: FutureProducer, topic: String) -> Self {
            Self {
                producer: Arc::new(producer),
                topic,
                timeout: Duration::from_secs(30),
            }
        }

        /// Set the send timeout
        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }

        fn headers(record: &DeadLetterRecord) -> OwnedHeaders {
            let partition = record.partition.to_string();
            let offset = record.offset.to_string();
            OwnedHeaders::new()
                .insert(Header {
                    key: "dlq.original.topic",
                    value: Some(record.topic.as_bytes()),
                })
                .insert(Header {
                    key: "dlq.original.partition",
                    value: Some(partition.as_bytes()),
                })
                .insert(Header {
                    key: "dlq.original.offset",
                    value: Some(offset.as_bytes()),
                })
                .insert(Header {
                    key: "dlq.error.message",
                    value: Some(record.error.as_bytes()),
                })
        }
    }

    #[async_trait]
    impl DeadLetterStore for KafkaDeadLetterStore {
        async fn append(&self, record: &DeadLetterRecord) -> Result<()> {
            let payload = serde_json::to_vec(record)?;
            let key = format!("{}-{}-{}", record.topic, record.partition, record.offset);
            let kafka_record = FutureRecord::to(&self.topic)
                .key(&key)
                .payload(&payload)
                .headers(Self::headers(record));

            match self.producer.send(kafka_record, self.timeout).await {
                Ok((partition, offset)) => {
                    debug!(
                        "Message sent to DLQ topic: {}, partition: {}, offset: {}",
                        self.topic, partition, offset
                    );
                    Ok(())
                }
                Err((e, _)) => {
                    error!("Failed to send message to DLQ: {}", e);
                    Err(PipelineError::Broker(BrokerError::from(e)))
                }
            }
        }
    }
}
