//! Resilient event log consumer
//!
//! This module provides the consumer pipeline with:
//! - Per-message retries with exponential backoff
//! - Manual offset commits for at-least-once delivery
//! - A dead-letter path for messages that exhaust their retries
//! - Reconnection with backoff and a fatal attempt limit
//! - Graceful shutdown over a watch channel
//!
//! # Example
//!
//! ```no_run
//! use cypher_pipeline::consumer::{
//!     ConsumerConfig, ConsumerLoop, FileDeadLetterStore, InMemoryEventLog, MessageProcessor,
//!     TopicRouter, UnknownTopicPolicy,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> cypher_pipeline::Result<()> {
//! let config = ConsumerConfig::builder()
//!     .topics(vec!["user-actions".to_string()])
//!     .build();
//!
//! let processor = MessageProcessor::new(
//!     TopicRouter::with_default_handlers(UnknownTopicPolicy::Ignore),
//!     Arc::new(FileDeadLetterStore::new(&config.dead_letter_path)),
//! );
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! let mut consumer = ConsumerLoop::new(
//!     Arc::new(InMemoryEventLog::default()),
//!     processor,
//!     config,
//!     shutdown_rx,
//! );
//! consumer.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod dlq;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod log;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod processor;
pub mod retry;

pub use config::{ConsumerConfig, ConsumerConfigBuilder, KafkaConfig};
pub use consumer::{ConsumerLoop, ConsumerState};
#[cfg(feature = "kafka")]
pub use dlq::KafkaDeadLetterStore;
pub use dlq::{DeadLetterBuffer, DeadLetterRecord, DeadLetterStore, FileDeadLetterStore};
pub use error::{BrokerError, HandlerError};
#[cfg(feature = "kafka")]
pub use kafka::KafkaEventLog;
pub use log::{EventLog, Subscription};
pub use memory::InMemoryEventLog;
pub use message::{Message, RECOMMENDATION_REQUESTS_TOPIC, USER_ACTIONS_TOPIC};
pub use metrics::{ConsumerMetrics, MetricsSnapshot};
pub use processor::{
    MessageHandler, MessageProcessor, ProcessingOutcome, RecommendationRequestHandler,
    TopicRouter, UnknownTopicPolicy, UserActionHandler,
};
pub use retry::RetryPolicy;
