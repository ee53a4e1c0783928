//! Liveness probes for backing services
//!
//! Each backing service is reached through a narrow capability trait so the
//! monitor never depends on a concrete client library. A service whose handle
//! is absent is still listed and reported as down.

use super::status::{ServiceCheckResult, ServiceStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Default per-check timeout
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_LOG_HINT: &str = "Check the SSL certificates and network connectivity";

/// Probe failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// No client handle was supplied for the service
    #[error("{0} client not configured")]
    NotConfigured(String),

    /// The probe ran and failed
    #[error("{0}")]
    Failed(String),

    /// The probe did not answer in time
    #[error("check timed out after {0:?}")]
    Timeout(Duration),
}

/// Relational database answering `SELECT 1`
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn select_one(&self) -> Result<i64, ProbeError>;
}

/// Document database answering a ping command with its `ok` field
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ping(&self) -> Result<f64, ProbeError>;
}

/// Key-value cache answering PING
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn ping(&self) -> Result<bool, ProbeError>;
}

/// Search cluster reporting its health
#[async_trait]
pub trait SearchCluster: Send + Sync {
    async fn cluster_health(&self) -> Result<ClusterHealth, ProbeError>;
}

/// Event log administration
#[async_trait]
pub trait EventLogAdmin: Send + Sync {
    async fn list_topics(&self) -> Result<Vec<String>, ProbeError>;
}

/// Cluster health report of a search cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub cluster_name: String,
    /// `green`, `yellow` or `red`
    pub status: String,
    #[serde(default)]
    pub number_of_nodes: u64,
    #[serde(default)]
    pub active_shards: u64,
}

/// Kind of backing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Relational,
    Document,
    Cache,
    Search,
    EventLog,
}

impl ServiceKind {
    /// Every kind in reporting order
    pub const ALL: [ServiceKind; 5] = [
        ServiceKind::Relational,
        ServiceKind::Document,
        ServiceKind::Cache,
        ServiceKind::Search,
        ServiceKind::EventLog,
    ];

    /// Name used in reports when none is given
    pub fn default_name(&self) -> &'static str {
        match self {
            ServiceKind::Relational => "PostgreSQL",
            ServiceKind::Document => "MongoDB",
            ServiceKind::Cache => "Redis",
            ServiceKind::Search => "Elasticsearch",
            ServiceKind::EventLog => "Kafka",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

/// A client handle for one backing service
#[derive(Clone)]
pub enum BackingService {
    Relational(Arc<dyn RelationalStore>),
    Document(Arc<dyn DocumentStore>),
    Cache(Arc<dyn CacheStore>),
    Search(Arc<dyn SearchCluster>),
    EventLog(Arc<dyn EventLogAdmin>),
}

impl fmt::Debug for BackingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackingService::{:?}", self.kind())
    }
}

impl BackingService {
    pub fn kind(&self) -> ServiceKind {
        match self {
            BackingService::Relational(_) => ServiceKind::Relational,
            BackingService::Document(_) => ServiceKind::Document,
            BackingService::Cache(_) => ServiceKind::Cache,
            BackingService::Search(_) => ServiceKind::Search,
            BackingService::EventLog(_) => ServiceKind::EventLog,
        }
    }

    /// Run the liveness probe and classify its answer
    async fn probe(&self) -> Result<(ServiceStatus, Option<Map<String, Value>>), ProbeError> {
        match self {
            BackingService::Relational(store) => {
                let value = store.select_one().await?;
                Ok((healthy_if(value == 1), None))
            }
            BackingService::Document(store) => {
                let ok = store.ping().await?;
                Ok((healthy_if(ok == 1.0), None))
            }
            BackingService::Cache(store) => {
                let pong = store.ping().await?;
                Ok((healthy_if(pong), None))
            }
            BackingService::Search(cluster) => {
                let health = cluster.cluster_health().await?;
                let status = healthy_if(health.status.eq_ignore_ascii_case("green"));
                let mut details = Map::new();
                details.insert("cluster_name".into(), json!(health.cluster_name));
                details.insert("cluster_status".into(), json!(health.status));
                details.insert("number_of_nodes".into(), json!(health.number_of_nodes));
                details.insert("active_shards".into(), json!(health.active_shards));
                Ok((status, Some(details)))
            }
            BackingService::EventLog(admin) => {
                let topics = admin.list_topics().await?;
                let mut details = Map::new();
                details.insert("topics".into(), json!(topics));
                Ok((ServiceStatus::Healthy, Some(details)))
            }
        }
    }

    fn failure_details(&self) -> Option<Map<String, Value>> {
        match self {
            BackingService::EventLog(_) => {
                let mut details = Map::new();
                details.insert("suggestion".into(), json!(EVENT_LOG_HINT));
                Some(details)
            }
            _ => None,
        }
    }
}

fn healthy_if(ok: bool) -> ServiceStatus {
    if ok {
        ServiceStatus::Healthy
    } else {
        ServiceStatus::Degraded
    }
}

/// A named entry in the monitor's registry
#[derive(Debug, Clone)]
pub struct MonitoredService {
    pub name: String,
    pub handle: Option<BackingService>,
}

impl MonitoredService {
    /// Service with a client handle
    pub fn new(name: impl Into<String>, handle: BackingService) -> Self {
        Self {
            name: name.into(),
            handle: Some(handle),
        }
    }

    /// Service listed without a client; always reported down
    pub fn unconfigured(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: None,
        }
    }

    /// Check the service once, never taking longer than `timeout`
    pub async fn check(&self, timeout: Duration) -> ServiceCheckResult {
        let Some(handle) = &self.handle else {
            return ServiceCheckResult::down(
                ProbeError::NotConfigured(self.name.clone()).to_string(),
                None,
            );
        };

        let start = Instant::now();
        let outcome = match tokio::time::timeout(timeout, handle.probe()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        };
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok((status, details)) => {
                debug!(service = %self.name, %status, latency_ms, "service check completed");
                ServiceCheckResult::completed(status, latency_ms, details)
            }
            Err(e) => {
                debug!(service = %self.name, error = %e, "service check failed");
                ServiceCheckResult::down(e.to_string(), handle.failure_details())
            }
        }
    }
}

/// Client handles for the standard set of backing services
#[derive(Default, Clone)]
pub struct ServiceRegistry {
    relational: Option<Arc<dyn RelationalStore>>,
    document: Option<Arc<dyn DocumentStore>>,
    cache: Option<Arc<dyn CacheStore>>,
    search: Option<Arc<dyn SearchCluster>>,
    event_log: Option<Arc<dyn EventLogAdmin>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relational(mut self, store: Arc<dyn RelationalStore>) -> Self {
        self.relational = Some(store);
        self
    }

    pub fn with_document(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.document = Some(store);
        self
    }

    pub fn with_cache(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(store);
        self
    }

    pub fn with_search(mut self, cluster: Arc<dyn SearchCluster>) -> Self {
        self.search = Some(cluster);
        self
    }

    pub fn with_event_log(mut self, admin: Arc<dyn EventLogAdmin>) -> Self {
        self.event_log = Some(admin);
        self
    }

    /// One entry per service kind under its default name, configured or not
    pub fn into_services(self) -> Vec<MonitoredService> {
        ServiceKind::ALL
            .iter()
            .map(|kind| {
                let handle = match kind {
                    ServiceKind::Relational => {
                        self.relational.clone().map(BackingService::Relational)
                    }
                    ServiceKind::Document => self.document.clone().map(BackingService::Document),
                    ServiceKind::Cache => self.cache.clone().map(BackingService::Cache),
                    ServiceKind::Search => self.search.clone().map(BackingService::Search),
                    ServiceKind::EventLog => self.event_log.clone().map(BackingService::EventLog),
                };
                MonitoredService {
                    name: kind.default_name().to_string(),
                    handle,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Relational(Result<i64, ProbeError>);

    #[async_trait]
    impl RelationalStore for Relational {
        async fn select_one(&self) -> Result<i64, ProbeError> {
            self.0.clone()
        }
    }

    struct Search(&'static str);

    #[async_trait]
    impl SearchCluster for Search {
        async fn cluster_health(&self) -> Result<ClusterHealth, ProbeError> {
            Ok(ClusterHealth {
                cluster_name: "cypher".into(),
                status: self.0.into(),
                number_of_nodes: 3,
                active_shards: 12,
            })
        }
    }

    struct SlowCache;

    #[async_trait]
    impl CacheStore for SlowCache {
        async fn ping(&self) -> Result<bool, ProbeError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }
    }

    struct BrokenAdmin;

    #[async_trait]
    impl EventLogAdmin for BrokenAdmin {
        async fn list_topics(&self) -> Result<Vec<String>, ProbeError> {
            Err(ProbeError::Failed("SSL handshake failed".into()))
        }
    }

    fn relational(answer: Result<i64, ProbeError>) -> MonitoredService {
        MonitoredService::new(
            "PostgreSQL",
            BackingService::Relational(Arc::new(Relational(answer))),
        )
    }

    #[tokio::test]
    async fn test_relational_classification() {
        let timeout = DEFAULT_CHECK_TIMEOUT;
        assert_eq!(relational(Ok(1)).check(timeout).await.status, ServiceStatus::Healthy);
        assert_eq!(relational(Ok(0)).check(timeout).await.status, ServiceStatus::Degraded);

        let down = relational(Err(ProbeError::Failed("connection refused".into())))
            .check(timeout)
            .await;
        assert_eq!(down.status, ServiceStatus::Down);
        assert_eq!(down.error.as_deref(), Some("connection refused"));
        assert!(down.latency_ms.is_none());
    }

    #[tokio::test]
    async fn test_search_status_and_details() {
        let green = MonitoredService::new("Elasticsearch", BackingService::Search(Arc::new(Search("green"))))
            .check(DEFAULT_CHECK_TIMEOUT)
            .await;
        assert_eq!(green.status, ServiceStatus::Healthy);
        let details = green.details.unwrap();
        assert_eq!(details["cluster_status"], json!("green"));
        assert_eq!(details["active_shards"], json!(12));

        for color in ["yellow", "red"] {
            let result = MonitoredService::new("Elasticsearch", BackingService::Search(Arc::new(Search(color))))
                .check(DEFAULT_CHECK_TIMEOUT)
                .await;
            assert_eq!(result.status, ServiceStatus::Degraded);
        }
    }

    #[tokio::test]
    async fn test_unconfigured_is_down() {
        let result = MonitoredService::unconfigured("MongoDB")
            .check(DEFAULT_CHECK_TIMEOUT)
            .await;
        assert_eq!(result.status, ServiceStatus::Down);
        assert_eq!(result.error.as_deref(), Some("MongoDB client not configured"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_down() {
        let result = MonitoredService::new("Redis", BackingService::Cache(Arc::new(SlowCache)))
            .check(Duration::from_secs(10))
            .await;
        assert_eq!(result.status, ServiceStatus::Down);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_event_log_failure_carries_hint() {
        let result = MonitoredService::new("Kafka", BackingService::EventLog(Arc::new(BrokenAdmin)))
            .check(DEFAULT_CHECK_TIMEOUT)
            .await;
        assert_eq!(result.status, ServiceStatus::Down);
        assert_eq!(result.details.unwrap()["suggestion"], json!(EVENT_LOG_HINT));
    }

    #[test]
    fn test_registry_lists_every_service() {
        let services = ServiceRegistry::new()
            .with_relational(Arc::new(Relational(Ok(1))))
            .into_services();
        let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["PostgreSQL", "MongoDB", "Redis", "Elasticsearch", "Kafka"]);
        assert!(services[0].handle.is_some());
        assert!(services[1..].iter().all(|s| s.handle.is_none()));
    }
}
