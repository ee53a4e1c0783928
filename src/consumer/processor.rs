//! Message handlers, topic routing and the retry/dead-letter loop

use crate::consumer::dlq::{DeadLetterBuffer, DeadLetterRecord, DeadLetterStore};
use crate::consumer::error::HandlerError;
use crate::consumer::message::{Message, RECOMMENDATION_REQUESTS_TOPIC, USER_ACTIONS_TOPIC};
use crate::consumer::metrics::ConsumerMetrics;
use crate::consumer::retry::RetryPolicy;
use crate::sink::{LifecycleEvent, ObservabilitySink, MESSAGES_INDEX};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Handles the messages of one topic
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message; errors are retried by the caller
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;

    /// Handler name for logs
    fn name(&self) -> &str {
        "MessageHandler"
    }
}

/// Split a payload into its `type` and `data` parts
fn decode_envelope(message: &Message) -> Result<(&str, &Map<String, Value>), HandlerError> {
    let event_type = message.event_type().ok_or_else(|| {
        HandlerError::InvalidPayload(format!(
            "missing string 'type' field at offset {}",
            message.offset
        ))
    })?;
    let data = message.data().ok_or_else(|| {
        HandlerError::InvalidPayload(format!(
            "missing object 'data' field at offset {}",
            message.offset
        ))
    })?;
    Ok((event_type, data))
}

/// Handler for `user-actions`
#[derive(Debug, Default, Clone, Copy)]
pub struct UserActionHandler;

#[async_trait]
impl MessageHandler for UserActionHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let (action, data) = decode_envelope(message)?;
        info!(
            action,
            user_id = ?data.get("user_id"),
            partition = message.partition,
            offset = message.offset,
            "User action received"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "UserActionHandler"
    }
}

/// Handler for `recommendation-requests`
#[derive(Debug, Default, Clone, Copy)]
pub struct RecommendationRequestHandler;

#[async_trait]
impl MessageHandler for RecommendationRequestHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let (request_type, data) = decode_envelope(message)?;
        info!(
            request_type,
            user_id = ?data.get("user_id"),
            partition = message.partition,
            offset = message.offset,
            "Recommendation request received"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "RecommendationRequestHandler"
    }
}

/// What to do with messages from topics that have no handler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTopicPolicy {
    /// Treat as processed
    #[default]
    Ignore,
    /// Fail, so the message is retried and dead-lettered
    Reject,
}

/// Dispatches messages to the handler registered for their topic
#[derive(Clone)]
pub struct TopicRouter {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    policy: UnknownTopicPolicy,
}

impl TopicRouter {
    /// Router with no handlers
    pub fn new(policy: UnknownTopicPolicy) -> Self {
        Self {
            handlers: HashMap::new(),
            policy,
        }
    }

    /// Router with the built-in handlers for the default topics
    pub fn with_default_handlers(policy: UnknownTopicPolicy) -> Self {
        Self::new(policy)
            .register(USER_ACTIONS_TOPIC, Arc::new(UserActionHandler))
            .register(
                RECOMMENDATION_REQUESTS_TOPIC,
                Arc::new(RecommendationRequestHandler),
            )
    }

    /// Register `handler` for `topic`, replacing any previous one
    pub fn register(mut self, topic: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(topic.into(), handler);
        self
    }

    /// Topics with a registered handler
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn policy(&self) -> UnknownTopicPolicy {
        self.policy
    }

    /// Run the handler for the message's topic
    pub async fn dispatch(&self, message: &Message) -> Result<(), HandlerError> {
        match self.handlers.get(&message.topic) {
            Some(handler) => {
                debug!(handler = handler.name(), topic = %message.topic, "dispatching");
                handler.handle(message).await
            }
            None => match self.policy {
                UnknownTopicPolicy::Ignore => {
                    debug!(topic = %message.topic, offset = message.offset, "no handler for topic, ignoring");
                    Ok(())
                }
                UnknownTopicPolicy::Reject => {
                    Err(HandlerError::UnknownTopic(message.topic.clone()))
                }
            },
        }
    }
}

/// Result of processing one message
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingOutcome {
    /// The handler succeeded on attempt `attempts`
    Processed { attempts: u32, elapsed: Duration },
    /// Every attempt failed and the message went to the dead-letter store
    DeadLettered { error: HandlerError, attempts: u32 },
}

impl ProcessingOutcome {
    /// Whether the offset may be committed
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessingOutcome::Processed { .. })
    }
}

/// Runs handlers with bounded retries and isolates permanent failures
pub struct MessageProcessor {
    router: TopicRouter,
    retry: RetryPolicy,
    dead_letters: Arc<dyn DeadLetterStore>,
    buffer: DeadLetterBuffer,
    sink: Option<Arc<dyn ObservabilitySink>>,
    messages_index: String,
    metrics: Arc<ConsumerMetrics>,
}

impl MessageProcessor {
    /// Create a processor with the default retry policy and no sink
    pub fn new(router: TopicRouter, dead_letters: Arc<dyn DeadLetterStore>) -> Self {
        Self {
            router,
            retry: RetryPolicy::message_processing(),
            dead_letters,
            buffer: DeadLetterBuffer::default(),
            sink: None,
            messages_index: MESSAGES_INDEX.to_string(),
            metrics: Arc::new(ConsumerMetrics::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Record lifecycle events in `sink`
    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_messages_index(mut self, index: impl Into<String>) -> Self {
        self.messages_index = index.into();
        self
    }

    /// Keep at most `capacity` dead-letter records in memory
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer = DeadLetterBuffer::new(capacity);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ConsumerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<ConsumerMetrics> {
        &self.metrics
    }

    /// Most recent dead-letter records, oldest first
    pub fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.buffer.snapshot()
    }

    /// Process `message`, retrying failures and dead-lettering it when the
    /// retry budget is spent.
    ///
    /// After the `n`th failed attempt the processor sleeps for the policy's
    /// backoff for `n`, including after the final attempt.
    pub async fn process_with_retry(&self, message: &Message) -> ProcessingOutcome {
        let mut retry_count = 0;
        let mut last_error = None;

        while self.retry.should_retry(retry_count) {
            self.emit(LifecycleEvent::received(message, retry_count)).await;

            let start = Instant::now();
            match self.router.dispatch(message).await {
                Ok(()) => {
                    let elapsed = start.elapsed();
                    self.metrics.record_processed(elapsed);
                    self.emit(LifecycleEvent::processed(
                        message,
                        elapsed.as_secs_f64() * 1000.0,
                    ))
                    .await;
                    debug!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        attempts = retry_count + 1,
                        "message processed"
                    );
                    return ProcessingOutcome::Processed {
                        attempts: retry_count + 1,
                        elapsed,
                    };
                }
                Err(e) => {
                    retry_count += 1;
                    self.metrics.increment_retries();
                    let delay = self.retry.backoff_for(retry_count);
                    warn!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        retry_count,
                        ?delay,
                        error = %e,
                        "Attempt {} failed for message {}",
                        retry_count,
                        message.offset
                    );
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let error =
            last_error.unwrap_or_else(|| HandlerError::failed("retry budget allows no attempts"));
        self.dead_letter(message, &error, retry_count).await;
        ProcessingOutcome::DeadLettered {
            error,
            attempts: retry_count,
        }
    }

    async fn dead_letter(&self, message: &Message, error: &HandlerError, retries: u32) {
        let record = DeadLetterRecord::from_failure(message, error);
        self.buffer.push(record.clone());
        self.metrics.increment_dead_lettered();

        if let Err(e) = self.dead_letters.append(&record).await {
            error!(
                topic = %message.topic,
                offset = message.offset,
                error = %e,
                "Failed to write dead-letter record"
            );
        }

        self.emit(LifecycleEvent::failed(message, &error.to_string(), retries))
            .await;
        error!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            retries,
            error = %error,
            "Message dead-lettered after exhausting retries"
        );
    }

    async fn emit(&self, event: LifecycleEvent) {
        let Some(sink) = &self.sink else {
            return;
        };
        let document = match serde_json::to_value(&event) {
            Ok(document) => document,
            Err(e) => {
                error!(error = %e, "Failed to encode lifecycle event");
                return;
            }
        };
        if let Err(e) = sink.index(&self.messages_index, document).await {
            error!(error = %e, "Failed to log to observability sink");
        }
    }
}
