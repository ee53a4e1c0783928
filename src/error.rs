//! Crate-level error types

use crate::consumer::error::BrokerError;
use crate::sink::SinkError;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by the consumer pipeline and the service monitor
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event log client failure
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Observability sink failure
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Dead-letter store failure
    #[error("Dead-letter error: {0}")]
    DeadLetter(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing failed
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Logging or tracing could not be installed
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// The consumer gave up reconnecting to the event log
    #[error("Reconnection attempts exhausted after {attempts} tries: {last_error}")]
    ReconnectExhausted {
        /// Number of consecutive failed attempts
        attempts: u32,
        /// The error reported by the last attempt
        last_error: String,
    },
}

impl PipelineError {
    /// Whether the error should stop the owning process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Config(_) | PipelineError::ReconnectExhausted { .. }
        )
    }
}
