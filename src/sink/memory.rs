//! In-process observability sink

use super::{LogQuery, ObservabilitySink, SearchResults, SinkError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Documents kept per index in insertion order
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    indices: Arc<RwLock<HashMap<String, Vec<Value>>>>,
    mappings: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All documents of `index`, oldest first
    pub fn documents(&self, index: &str) -> Vec<Value> {
        self.indices.read().get(index).cloned().unwrap_or_default()
    }

    /// Mappings registered for `index`
    pub fn mappings(&self, index: &str) -> Option<Value> {
        self.mappings.read().get(index).cloned()
    }

    fn document_time(document: &Value) -> Option<DateTime<Utc>> {
        document
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

#[async_trait]
impl ObservabilitySink for InMemorySink {
    async fn index(&self, index: &str, document: Value) -> Result<String, SinkError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.indices
            .write()
            .entry(index.to_string())
            .or_default()
            .push(document);
        Ok(id)
    }

    async fn search(&self, index: &str, query: &LogQuery) -> Result<SearchResults, SinkError> {
        let now = Utc::now();
        let since = now - ChronoDuration::minutes(i64::from(query.last_minutes));

        let indices = self.indices.read();
        let mut matching: Vec<(DateTime<Utc>, &Value)> = indices
            .get(index)
            .map(|docs| {
                docs.iter()
                    .filter_map(|doc| Self::document_time(doc).map(|ts| (ts, doc)))
                    .filter(|(ts, _)| *ts >= since && *ts <= now)
                    .collect()
            })
            .unwrap_or_default();

        matching.sort_by(|a, b| b.0.cmp(&a.0));
        let total = matching.len() as u64;
        let hits = matching
            .into_iter()
            .take(query.size)
            .map(|(_, doc)| doc.clone())
            .collect();

        Ok(SearchResults { hits, total })
    }

    async fn ensure_index(&self, index: &str, mappings: &Value) -> Result<(), SinkError> {
        self.mappings
            .write()
            .entry(index.to_string())
            .or_insert_with(|| mappings.clone());
        Ok(())
    }
}
