//! Event log client abstraction
//!
//! The consumer talks to the broker only through these two traits, which keeps
//! the loop testable against an in-process log and lets the Kafka client live
//! behind the `kafka` feature.

use crate::consumer::error::BrokerError;
use crate::consumer::message::Message;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// An append-only, partitioned log
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a record, returning the partition and offset it was written to
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &Value,
    ) -> Result<(i32, i64), BrokerError>;

    /// Join the consumer group for `topics`
    async fn subscribe(&self, topics: &[String]) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// A live subscription with manual offset management
#[async_trait]
pub trait Subscription: Send {
    /// Wait up to `timeout` for records.
    ///
    /// Records are grouped by partition and ordered by offset within each
    /// partition. An empty batch is not an error.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Message>, BrokerError>;

    /// Mark `message` as processed for its partition
    async fn commit(&mut self, message: &Message) -> Result<(), BrokerError>;

    /// Leave the group and release client resources
    async fn close(&mut self) -> Result<(), BrokerError>;
}
