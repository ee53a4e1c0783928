//! In-process event log
//!
//! Partitioned, offset-ordered storage with per-partition committed offsets.
//! Subscriptions resume from the last committed offset, so records that were
//! read but never committed are delivered again after a reconnect.

use crate::consumer::error::BrokerError;
use crate::consumer::log::{EventLog, Subscription};
use crate::consumer::message::Message;
use crate::monitor::probe::{EventLogAdmin, ProbeError};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

type PartitionKey = (String, i32);

#[derive(Debug, Default)]
struct LogState {
    partitions: BTreeMap<PartitionKey, Vec<Message>>,
    committed: HashMap<PartitionKey, i64>,
    commit_log: Vec<(String, i32, i64)>,
    closed_subscriptions: usize,
}

/// Shared in-memory log; clones refer to the same storage
#[derive(Debug, Clone)]
pub struct InMemoryEventLog {
    state: Arc<Mutex<LogState>>,
    notify: Arc<Notify>,
    partitions_per_topic: i32,
    max_poll_records: usize,
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new(1)
    }
}

impl InMemoryEventLog {
    /// Create a log where every topic has `partitions_per_topic` partitions
    pub fn new(partitions_per_topic: i32) -> Self {
        Self {
            state: Arc::new(Mutex::new(LogState::default())),
            notify: Arc::new(Notify::new()),
            partitions_per_topic: partitions_per_topic.max(1),
            max_poll_records: 500,
        }
    }

    /// Cap the number of records returned by one poll
    pub fn with_max_poll_records(mut self, max: usize) -> Self {
        self.max_poll_records = max.max(1);
        self
    }

    /// Append a record to an explicit partition
    pub fn publish_to(&self, topic: &str, partition: i32, value: Value) -> i64 {
        let offset = {
            let mut state = self.state.lock();
            let records = state
                .partitions
                .entry((topic.to_string(), partition))
                .or_default();
            let offset = records.len() as i64;
            records.push(Message::new(topic, partition, offset, value, Utc::now()));
            offset
        };
        self.notify.notify_waiters();
        offset
    }

    /// Last committed message offset for a partition
    pub fn committed_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .lock()
            .committed
            .get(&(topic.to_string(), partition))
            .copied()
    }

    /// Every commit in the order it was made
    pub fn commits(&self) -> Vec<(String, i32, i64)> {
        self.state.lock().commit_log.clone()
    }

    /// Number of records stored for a partition
    pub fn len(&self, topic: &str, partition: i32) -> usize {
        self.state
            .lock()
            .partitions
            .get(&(topic.to_string(), partition))
            .map_or(0, Vec::len)
    }

    /// Whether the log holds no records at all
    pub fn is_empty(&self) -> bool {
        self.state.lock().partitions.values().all(Vec::is_empty)
    }

    /// Number of subscriptions that have been released
    pub fn closed_subscriptions(&self) -> usize {
        self.state.lock().closed_subscriptions
    }

    fn partition_for(&self, key: Option<&str>) -> i32 {
        match key {
            None => 0,
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.partitions_per_topic as u64) as i32
            }
        }
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &Value,
    ) -> Result<(i32, i64), BrokerError> {
        let partition = self.partition_for(key);
        let offset = self.publish_to(topic, partition, value.clone());
        Ok((partition, offset))
    }

    async fn subscribe(&self, topics: &[String]) -> Result<Box<dyn Subscription>, BrokerError> {
        if topics.is_empty() {
            return Err(BrokerError::Subscription("no topics given".to_string()));
        }
        debug!(?topics, "in-memory subscription created");
        Ok(Box::new(InMemorySubscription {
            log: self.clone(),
            topics: topics.to_vec(),
            positions: HashMap::new(),
            closed: false,
        }))
    }
}

#[async_trait]
impl EventLogAdmin for InMemoryEventLog {
    async fn list_topics(&self) -> Result<Vec<String>, ProbeError> {
        let state = self.state.lock();
        let mut topics: Vec<String> = state.partitions.keys().map(|(t, _)| t.clone()).collect();
        topics.dedup();
        Ok(topics)
    }
}

/// Subscription over an [`InMemoryEventLog`]
#[derive(Debug)]
pub struct InMemorySubscription {
    log: InMemoryEventLog,
    topics: Vec<String>,
    positions: HashMap<PartitionKey, i64>,
    closed: bool,
}

impl InMemorySubscription {
    fn drain_available(&mut self) -> Vec<Message> {
        let state = self.log.state.lock();
        let mut batch = Vec::new();
        for ((topic, partition), records) in &state.partitions {
            if !self.topics.contains(topic) {
                continue;
            }
            let key = (topic.clone(), *partition);
            let start = *self.positions.entry(key.clone()).or_insert_with(|| {
                state.committed.get(&key).map_or(0, |committed| committed + 1)
            });
            for message in records.iter().skip(start.max(0) as usize) {
                if batch.len() >= self.log.max_poll_records {
                    return batch;
                }
                batch.push(message.clone());
                self.positions.insert(key.clone(), message.offset + 1);
            }
        }
        batch
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Message>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Other("subscription is closed".to_string()));
        }
        let notify = self.log.notify.clone();
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let batch = self.drain_available();
        if !batch.is_empty() {
            return Ok(batch);
        }
        let _ = tokio::time::timeout(timeout, notified).await;
        Ok(self.drain_available())
    }

    async fn commit(&mut self, message: &Message) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Commit("subscription is closed".to_string()));
        }
        let mut state = self.log.state.lock();
        state
            .committed
            .insert((message.topic.clone(), message.partition), message.offset);
        state
            .commit_log
            .push((message.topic.clone(), message.partition, message.offset));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if !self.closed {
            self.closed = true;
            self.log.state.lock().closed_subscriptions += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_poll_returns_records_in_offset_order() {
        let log = InMemoryEventLog::new(1);
        for i in 0..3 {
            log.publish("user-actions", None, &json!({"n": i})).await.unwrap();
        }
        let mut sub = log.subscribe(&["user-actions".to_string()]).await.unwrap();
        let batch = sub.poll(Duration::from_millis(10)).await.unwrap();
        let offsets: Vec<i64> = batch.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2]);

        let empty = sub.poll(Duration::from_millis(10)).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_resubscribe_resumes_after_committed_offset() {
        let log = InMemoryEventLog::new(1);
        for i in 0..3 {
            log.publish_to("user-actions", 0, json!({"n": i}));
        }
        let topics = vec!["user-actions".to_string()];
        let mut sub = log.subscribe(&topics).await.unwrap();
        let batch = sub.poll(Duration::from_millis(10)).await.unwrap();
        sub.commit(&batch[0]).await.unwrap();
        sub.close().await.unwrap();

        let mut again = log.subscribe(&topics).await.unwrap();
        let batch = again.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.first().map(|m| m.offset), Some(1));
        assert_eq!(log.committed_offset("user-actions", 0), Some(0));
        assert_eq!(log.closed_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_ignores_unsubscribed_topics() {
        let log = InMemoryEventLog::new(1);
        log.publish_to("audit", 0, json!({}));
        let mut sub = log.subscribe(&["user-actions".to_string()]).await.unwrap();
        assert!(sub.poll(Duration::from_millis(10)).await.unwrap().is_empty());
        assert_eq!(log.list_topics().await.unwrap(), vec!["audit".to_string()]);
    }

    #[tokio::test]
    async fn test_keyed_publish_is_sticky() {
        let log = InMemoryEventLog::new(4);
        let (p1, _) = log.publish("user-actions", Some("user-1"), &json!({})).await.unwrap();
        let (p2, o2) = log.publish("user-actions", Some("user-1"), &json!({})).await.unwrap();
        assert_eq!(p1, p2);
        assert_eq!(o2, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_wakes_on_publish() {
        let log = InMemoryEventLog::new(1);
        let mut sub = log.subscribe(&["user-actions".to_string()]).await.unwrap();
        let producer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            producer.publish_to("user-actions", 0, json!({"late": true}));
        });
        let batch = sub.poll(Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
