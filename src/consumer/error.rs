//! Consumer error types

use thiserror::Error;

/// Errors reported by an event log client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// No broker could be reached
    #[error("No brokers available: {0}")]
    NoBrokersAvailable(String),

    /// The broker for a partition is not ready to serve requests
    #[error("Node not ready: {0}")]
    NodeNotReady(String),

    /// A request did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Subscribing to topics failed
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Committing an offset failed
    #[error("Commit error: {0}")]
    Commit(String),

    /// Publishing a record failed
    #[error("Publish error: {0}")]
    Publish(String),

    /// Any other client error
    #[error("Broker error: {0}")]
    Other(String),
}

impl BrokerError {
    /// Connection-level errors end the current session and trigger a reconnect
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BrokerError::NoBrokersAvailable(_) | BrokerError::NodeNotReady(_)
        )
    }
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for BrokerError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        use rdkafka::error::{KafkaError, RDKafkaErrorCode};

        let message = err.to_string();
        match err.rdkafka_error_code() {
            Some(RDKafkaErrorCode::AllBrokersDown)
            | Some(RDKafkaErrorCode::BrokerTransportFailure) => {
                BrokerError::NoBrokersAvailable(message)
            }
            Some(RDKafkaErrorCode::BrokerNotAvailable)
            | Some(RDKafkaErrorCode::LeaderNotAvailable)
            | Some(RDKafkaErrorCode::NotLeaderForPartition) => BrokerError::NodeNotReady(message),
            Some(RDKafkaErrorCode::OperationTimedOut) | Some(RDKafkaErrorCode::RequestTimedOut) => {
                BrokerError::Timeout(message)
            }
            _ => match err {
                KafkaError::Subscription(_) => BrokerError::Subscription(message),
                KafkaError::ConsumerCommit(_) => BrokerError::Commit(message),
                KafkaError::MessageProduction(_) => BrokerError::Publish(message),
                _ => BrokerError::Other(message),
            },
        }
    }
}

/// Errors returned by message handlers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The payload does not carry the expected envelope
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// No handler is registered for the topic and the router rejects it
    #[error("No handler registered for topic '{0}'")]
    UnknownTopic(String),

    /// The handler ran and failed
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// Convenience constructor for handler failures
    pub fn failed(reason: impl Into<String>) -> Self {
        HandlerError::Failed(reason.into())
    }
}
