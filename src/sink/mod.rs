//! Observability sink: an index-and-query store for time-stamped documents
//!
//! Lifecycle events from the consumer and status snapshots from the monitor
//! are written here. Every caller treats the sink as best-effort: errors are
//! logged where they occur and never interrupt processing or monitoring.

pub mod document;
#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;
pub mod memory;

pub use document::{
    LifecycleEvent, LifecycleStatus, MessageEventKind, MonitorDocument, MESSAGES_INDEX,
    MONITOR_INDEX,
};
#[cfg(feature = "elasticsearch")]
pub use elasticsearch::ElasticsearchSink;
pub use memory::InMemorySink;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

/// Default number of documents returned by a log query
pub const DEFAULT_QUERY_SIZE: usize = 50;

/// Sink client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink could not be reached
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// The request could not be sent or completed
    #[error("Request failed: {0}")]
    Request(String),

    /// The sink answered with an error status
    #[error("Sink returned status {status}: {body}")]
    Response {
        /// HTTP-like status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// The response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Time-bounded query for the most recent documents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    /// Size of the window ending now, in minutes
    pub last_minutes: u32,
    /// Maximum number of documents to return
    pub size: usize,
}

impl LogQuery {
    /// Query the last `last_minutes` minutes with the default size
    pub fn last_minutes(last_minutes: u32) -> Self {
        Self {
            last_minutes,
            size: DEFAULT_QUERY_SIZE,
        }
    }

    /// Override the result size
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Search request body in Elasticsearch query DSL
    pub fn to_search_body(&self) -> Value {
        json!({
            "query": {
                "range": {
                    "timestamp": {
                        "gte": format!("now-{}m", self.last_minutes),
                        "lte": "now"
                    }
                }
            },
            "sort": [{"timestamp": {"order": "desc"}}],
            "size": self.size
        })
    }
}

/// Documents matching a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    /// Matching documents, newest first
    pub hits: Vec<Value>,
    /// Total number of matches reported by the sink
    pub total: u64,
}

/// Index-and-query store for time-stamped documents
#[async_trait]
pub trait ObservabilitySink: Send + Sync {
    /// Store `document` in `index`, returning its id
    async fn index(&self, index: &str, document: Value) -> Result<String, SinkError>;

    /// Run `query` against `index`
    async fn search(&self, index: &str, query: &LogQuery) -> Result<SearchResults, SinkError>;

    /// Create `index` with `mappings` unless it already exists
    async fn ensure_index(&self, _index: &str, _mappings: &Value) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_body() {
        let body = LogQuery::last_minutes(5).to_search_body();
        assert_eq!(body["query"]["range"]["timestamp"]["gte"], json!("now-5m"));
        assert_eq!(body["sort"][0]["timestamp"]["order"], json!("desc"));
        assert_eq!(body["size"], json!(50));
    }
}
