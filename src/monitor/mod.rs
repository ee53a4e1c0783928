//! Service health monitor
//!
//! Checks every registered backing service on a fixed interval, keeps the
//! most recent snapshots in a [`StatusWindow`], derives anomalies from the
//! trend and persists each snapshot to the observability sink.

pub mod anomaly;
pub mod probe;
pub mod service;
pub mod status;
pub mod window;

pub use anomaly::{Anomaly, AnomalyDetector};
pub use probe::{
    BackingService, CacheStore, ClusterHealth, DocumentStore, EventLogAdmin, MonitoredService,
    ProbeError, RelationalStore, SearchCluster, ServiceKind, ServiceRegistry,
    DEFAULT_CHECK_TIMEOUT,
};
pub use service::{LogQueryReport, LogQueryStatus, ServiceMonitor};
pub use status::{ServiceCheckResult, ServiceStatus, StatusSnapshot};
pub use window::{StatusWindow, DEFAULT_WINDOW_CAPACITY};
