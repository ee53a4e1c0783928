//! Shared fakes for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use cypher_pipeline::consumer::{
    BrokerError, DeadLetterRecord, DeadLetterStore, EventLog, HandlerError, InMemoryEventLog,
    Message, MessageHandler, Subscription,
};
use cypher_pipeline::sink::{LogQuery, ObservabilitySink, SearchResults, SinkError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct Script {
    subscribe: VecDeque<Result<(), BrokerError>>,
    poll: VecDeque<BrokerError>,
    commit: VecDeque<BrokerError>,
    subscribe_times: Vec<Instant>,
}

/// In-memory log whose subscribe, poll and commit calls fail on a script
#[derive(Clone)]
pub struct FlakyLog {
    pub inner: InMemoryEventLog,
    script: Arc<Mutex<Script>>,
}

impl FlakyLog {
    pub fn new(inner: InMemoryEventLog) -> Self {
        Self {
            inner,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// Queue subscribe outcomes; once drained, subscribing succeeds
    pub fn script_subscribe(&self, outcomes: impl IntoIterator<Item = Result<(), BrokerError>>) {
        self.script.lock().subscribe.extend(outcomes);
    }

    /// Queue errors returned by the next polls
    pub fn fail_polls(&self, errors: impl IntoIterator<Item = BrokerError>) {
        self.script.lock().poll.extend(errors);
    }

    /// Queue errors returned by the next commits
    pub fn fail_commits(&self, errors: impl IntoIterator<Item = BrokerError>) {
        self.script.lock().commit.extend(errors);
    }

    /// When each subscribe call happened
    pub fn subscribe_times(&self) -> Vec<Instant> {
        self.script.lock().subscribe_times.clone()
    }

    /// Gaps between consecutive subscribe calls
    pub fn subscribe_gaps(&self) -> Vec<Duration> {
        self.subscribe_times()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }
}

#[async_trait]
impl EventLog for FlakyLog {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &Value,
    ) -> Result<(i32, i64), BrokerError> {
        self.inner.publish(topic, key, value).await
    }

    async fn subscribe(&self, topics: &[String]) -> Result<Box<dyn Subscription>, BrokerError> {
        let outcome = {
            let mut script = self.script.lock();
            script.subscribe_times.push(Instant::now());
            script.subscribe.pop_front().unwrap_or(Ok(()))
        };
        outcome?;
        let inner = self.inner.subscribe(topics).await?;
        Ok(Box::new(FlakySubscription {
            inner,
            script: self.script.clone(),
        }))
    }
}

struct FlakySubscription {
    inner: Box<dyn Subscription>,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl Subscription for FlakySubscription {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Message>, BrokerError> {
        let scripted = self.script.lock().poll.pop_front();
        match scripted {
            Some(err) => Err(err),
            None => self.inner.poll(timeout).await,
        }
    }

    async fn commit(&mut self, message: &Message) -> Result<(), BrokerError> {
        let scripted = self.script.lock().commit.pop_front();
        match scripted {
            Some(err) => Err(err),
            None => self.inner.commit(message).await,
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.inner.close().await
    }
}

/// Dead-letter store that keeps records in memory
#[derive(Default)]
pub struct RecordingStore {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl RecordingStore {
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl DeadLetterStore for RecordingStore {
    async fn append(&self, record: &DeadLetterRecord) -> cypher_pipeline::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Fails every message whose payload has `"poison": true`
#[derive(Default)]
pub struct PoisonAwareHandler {
    pub calls: AtomicU32,
}

#[async_trait]
impl MessageHandler for PoisonAwareHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if message.value.get("poison").and_then(Value::as_bool) == Some(true) {
            return Err(HandlerError::failed("poison payload"));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "PoisonAwareHandler"
    }
}

/// Fails the first `failures` calls, then succeeds
pub struct FlakyHandler {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyHandler {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for FlakyHandler {
    async fn handle(&self, _message: &Message) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(HandlerError::failed(format!("transient failure {}", call + 1)))
        } else {
            Ok(())
        }
    }
}

/// Sink that rejects every request
pub struct UnreachableSink;

#[async_trait]
impl ObservabilitySink for UnreachableSink {
    async fn index(&self, _index: &str, _document: Value) -> Result<String, SinkError> {
        Err(SinkError::Unavailable("connection refused".to_string()))
    }

    async fn search(&self, _index: &str, _query: &LogQuery) -> Result<SearchResults, SinkError> {
        Err(SinkError::Unavailable("connection refused".to_string()))
    }
}

/// Sink that answers every search with a malformed-query error
pub struct RejectingSink;

#[async_trait]
impl ObservabilitySink for RejectingSink {
    async fn index(&self, _index: &str, _document: Value) -> Result<String, SinkError> {
        Ok("ignored".to_string())
    }

    async fn search(&self, _index: &str, _query: &LogQuery) -> Result<SearchResults, SinkError> {
        Err(SinkError::Response {
            status: 400,
            body: "parsing_exception".to_string(),
        })
    }
}

/// Broker error that ends a consume session
pub fn no_brokers() -> BrokerError {
    BrokerError::NoBrokersAvailable("all brokers down".to_string())
}

/// Gaps between reconnect attempts of the default reconnection policy
pub fn reconnect_gaps() -> Vec<Duration> {
    [10, 20, 40, 80].into_iter().map(Duration::from_secs).collect()
}
