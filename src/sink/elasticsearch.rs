//! Elasticsearch REST client
//!
//! Serves both as the observability sink and as the search-cluster handle
//! checked by the service monitor.

use super::{LogQuery, ObservabilitySink, SearchResults, SinkError};
use crate::config::SinkConfig;
use crate::monitor::probe::{ClusterHealth, ProbeError, SearchCluster};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Longest response body kept in error messages
const MAX_ERROR_BODY: usize = 512;

/// Elasticsearch client over its HTTP API
#[derive(Clone)]
pub struct ElasticsearchSink {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    api_key: Option<String>,
}

impl std::fmt::Debug for ElasticsearchSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchSink")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ElasticsearchSink {
    /// Create a client for `base_url` with a request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: None,
            password: None,
            api_key: None,
        })
    }

    /// Build from configuration; `None` when no URL is configured
    pub fn from_config(config: &SinkConfig) -> Result<Option<Self>, SinkError> {
        let Some(url) = config.url.as_deref() else {
            return Ok(None);
        };
        let mut sink = Self::new(url, Duration::from_millis(config.request_timeout_ms))?;
        if let Some(username) = &config.username {
            sink = sink.with_basic_auth(username.clone(), config.password.clone());
        }
        if let Some(api_key) = &config.api_key {
            sink = sink.with_api_key(api_key.clone());
        }
        Ok(Some(sink))
    }

    /// Authenticate with an API key; takes precedence over basic auth
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Authenticate every request
    pub fn with_basic_auth(mut self, username: String, password: Option<String>) -> Self {
        self.username = Some(username);
        self.password = password;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.api_key, &self.username) {
            (Some(key), _) => request.header(reqwest::header::AUTHORIZATION, format!("ApiKey {}", key)),
            (None, Some(username)) => request.basic_auth(username, self.password.as_deref()),
            (None, None) => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, SinkError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(classify_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Response {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| SinkError::Decode(e.to_string()))
    }
}

/// Cut `body` to at most `MAX_ERROR_BODY` bytes on a char boundary
fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|&i| body.is_char_boundary(i))
            .unwrap_or(0);
        body.truncate(cut);
    }
    body
}

fn classify_transport_error(err: reqwest::Error) -> SinkError {
    if err.is_connect() || err.is_timeout() {
        SinkError::Unavailable(err.to_string())
    } else {
        SinkError::Request(err.to_string())
    }
}

#[async_trait]
impl ObservabilitySink for ElasticsearchSink {
    async fn index(&self, index: &str, document: Value) -> Result<String, SinkError> {
        let body = self
            .send(self.client.post(self.url(&format!("{index}/_doc"))).json(&document))
            .await?;
        body.get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SinkError::Decode("index response has no _id".to_string()))
    }

    async fn search(&self, index: &str, query: &LogQuery) -> Result<SearchResults, SinkError> {
        let body = self
            .send(
                self.client
                    .post(self.url(&format!("{index}/_search")))
                    .json(&query.to_search_body()),
            )
            .await?;

        let hits = body
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .ok_or_else(|| SinkError::Decode("search response has no hits".to_string()))?
            .iter()
            .filter_map(|hit| hit.get("_source").cloned())
            .collect();
        // Older clusters report the total as a bare number
        let total = body
            .pointer("/hits/total/value")
            .or_else(|| body.pointer("/hits/total"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        Ok(SearchResults { hits, total })
    }

    async fn ensure_index(&self, index: &str, mappings: &Value) -> Result<(), SinkError> {
        let response = self
            .authorize(self.client.head(self.url(index)))
            .send()
            .await
            .map_err(classify_transport_error)?;
        match response.status() {
            status if status.is_success() => {
                debug!(index, "index already exists");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                let body = serde_json::json!({ "mappings": mappings });
                self.send(self.client.put(self.url(index)).json(&body)).await?;
                info!(index, "created index");
                Ok(())
            }
            status => Err(SinkError::Response {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }
}

#[async_trait]
impl SearchCluster for ElasticsearchSink {
    async fn cluster_health(&self) -> Result<ClusterHealth, ProbeError> {
        let body = self
            .send(self.client.get(self.url("_cluster/health")))
            .await
            .map_err(|e| ProbeError::Failed(e.to_string()))?;
        serde_json::from_value(body).map_err(|e| ProbeError::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn sink_for(server: &MockServer) -> ElasticsearchSink {
        ElasticsearchSink::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_index_returns_document_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cypher-messages/_doc"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"_id": "abc"})))
            .mount(&server)
            .await;

        let id = sink_for(&server)
            .await
            .index("cypher-messages", json!({"status": "processing"}))
            .await
            .unwrap();
        assert_eq!(id, "abc");
    }

    #[tokio::test]
    async fn test_search_extracts_sources_and_total() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cypher-messages/_search"))
            .and(body_partial_json(json!({"size": 50})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": {
                    "total": {"value": 120, "relation": "eq"},
                    "hits": [{"_id": "1", "_source": {"status": "completed"}}]
                }
            })))
            .mount(&server)
            .await;

        let results = sink_for(&server)
            .await
            .search("cypher-messages", &LogQuery::last_minutes(5))
            .await
            .unwrap();
        assert_eq!(results.total, 120);
        assert_eq!(results.hits, vec![json!({"status": "completed"})]);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = sink_for(&server)
            .await
            .index("cypher-monitor", json!({}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SinkError::Response {
                status: 503,
                body: "overloaded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_long_multibyte_error_body_is_cut_on_char_boundary() {
        let server = MockServer::start().await;
        let body = format!("{}é{}", "a".repeat(511), "b".repeat(100));
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(body))
            .mount(&server)
            .await;

        let err = sink_for(&server)
            .await
            .index("cypher-messages", json!({}))
            .await
            .unwrap_err();
        match err {
            SinkError::Response { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "a".repeat(511));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ensure_index_creates_missing_index() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/cypher-monitor"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/cypher-monitor"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
            .expect(1)
            .mount(&server)
            .await;

        sink_for(&server)
            .await
            .ensure_index("cypher-monitor", &json!({"properties": {}}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_key_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .and(header("authorization", "ApiKey c2VjcmV0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cluster_name": "cypher",
                "status": "green",
                "number_of_nodes": 3,
                "active_shards": 12
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = SinkConfig {
            url: Some(server.uri()),
            api_key: Some("c2VjcmV0".to_string()),
            ..SinkConfig::default()
        };
        let sink = ElasticsearchSink::from_config(&config).unwrap().unwrap();
        assert_eq!(sink.cluster_health().await.unwrap().number_of_nodes, 3);
        assert!(ElasticsearchSink::from_config(&SinkConfig::default())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cluster_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cluster_name": "cypher",
                "status": "yellow",
                "number_of_nodes": 1,
                "active_shards": 7
            })))
            .mount(&server)
            .await;

        let health = sink_for(&server).await.cluster_health().await.unwrap();
        assert_eq!(health.cluster_name, "cypher");
        assert_eq!(health.active_shards, 7);
    }
}
