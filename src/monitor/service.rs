//! Periodic service monitor

use super::anomaly::{Anomaly, AnomalyDetector};
use super::probe::MonitoredService;
use super::status::{ServiceCheckResult, StatusSnapshot};
use super::window::StatusWindow;
use crate::config::MonitorConfig;
use crate::sink::{
    LogQuery, MonitorDocument, ObservabilitySink, SinkError, MESSAGES_INDEX, MONITOR_INDEX,
};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Outcome class of a log query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogQueryStatus {
    Success,
    NotAvailable,
    Error,
}

/// Result of querying recent lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogQueryReport {
    pub status: LogQueryStatus,
    /// Matching documents, newest first; empty unless the query succeeded
    pub logs: Vec<Value>,
    /// Total matches reported by the sink
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogQueryReport {
    fn not_available() -> Self {
        Self {
            status: LogQueryStatus::NotAvailable,
            logs: Vec::new(),
            total: 0,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            status: LogQueryStatus::Error,
            logs: Vec::new(),
            total: 0,
            error: Some(error),
        }
    }
}

/// Checks backing services, keeps a window of snapshots and persists them
pub struct ServiceMonitor {
    services: Vec<MonitoredService>,
    sink: Option<Arc<dyn ObservabilitySink>>,
    config: MonitorConfig,
    detector: AnomalyDetector,
    window: StatusWindow,
    last_status: BTreeMap<String, ServiceCheckResult>,
    messages_index: String,
    monitor_index: String,
}

impl ServiceMonitor {
    /// Create a monitor for `services`
    pub fn new(services: Vec<MonitoredService>, config: MonitorConfig) -> Self {
        Self {
            services,
            sink: None,
            detector: config.anomaly,
            window: StatusWindow::new(config.window_capacity),
            config,
            last_status: BTreeMap::new(),
            messages_index: MESSAGES_INDEX.to_string(),
            monitor_index: MONITOR_INDEX.to_string(),
        }
    }

    /// Persist snapshots to and query logs from `sink`
    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Override the index names
    pub fn with_indices(
        mut self,
        messages_index: impl Into<String>,
        monitor_index: impl Into<String>,
    ) -> Self {
        self.messages_index = messages_index.into();
        self.monitor_index = monitor_index.into();
        self
    }

    /// Services checked each cycle
    pub fn services(&self) -> &[MonitoredService] {
        &self.services
    }

    /// Snapshots of the recent cycles
    pub fn window(&self) -> &StatusWindow {
        &self.window
    }

    /// Results of the latest cycle
    pub fn last_status(&self) -> &BTreeMap<String, ServiceCheckResult> {
        &self.last_status
    }

    /// Check every registered service and record the snapshot
    pub async fn check_all_services(&mut self) -> BTreeMap<String, ServiceCheckResult> {
        let timeout = self.config.check_timeout();
        let results = join_all(self.services.iter().map(|service| async move {
            (service.name.clone(), service.check(timeout).await)
        }))
        .await;

        let status: BTreeMap<String, ServiceCheckResult> = results.into_iter().collect();
        self.record(StatusSnapshot::new(status.clone()));
        status
    }

    /// Push a snapshot into the window and make it the last status
    pub fn record(&mut self, snapshot: StatusSnapshot) {
        self.last_status = snapshot.services.clone();
        self.window.push(snapshot);
    }

    /// Anomalies in the latest snapshot
    pub fn detect_anomalies(&self) -> Vec<Anomaly> {
        self.detector.detect(&self.window)
    }

    /// Query lifecycle events of the last `last_minutes` minutes
    pub async fn check_elasticsearch_logs(&self, last_minutes: u32) -> LogQueryReport {
        let Some(sink) = &self.sink else {
            return LogQueryReport::not_available();
        };
        let query = LogQuery::last_minutes(last_minutes).with_size(self.config.log_query_size);
        match sink.search(&self.messages_index, &query).await {
            Ok(results) => LogQueryReport {
                status: LogQueryStatus::Success,
                logs: results.hits,
                total: results.total,
                error: None,
            },
            Err(SinkError::Unavailable(reason)) => {
                warn!(reason = %reason, "Observability sink unreachable for log query");
                LogQueryReport::not_available()
            }
            Err(e) => LogQueryReport::failed(e.to_string()),
        }
    }

    /// Persist one snapshot document; failures are logged
    pub async fn log_status(
        &self,
        status: &BTreeMap<String, ServiceCheckResult>,
        anomalies: &[Anomaly],
    ) {
        let Some(sink) = &self.sink else {
            warn!("Observability sink not available for status logging");
            return;
        };

        let document = MonitorDocument::new(
            status.clone(),
            anomalies.iter().map(ToString::to_string).collect(),
            &self.config.source,
            &self.config.version,
        );
        let document = match serde_json::to_value(document) {
            Ok(document) => document,
            Err(e) => {
                error!(error = %e, "Failed to encode status document");
                return;
            }
        };
        match sink.index(&self.monitor_index, document).await {
            Ok(id) => info!(id = %id, index = %self.monitor_index, "Status logged"),
            Err(e) => error!(error = %e, "Error logging status to sink"),
        }
    }

    /// Create the monitor index if the sink lacks it
    pub async fn prepare_index(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(e) = sink
            .ensure_index(&self.monitor_index, &MonitorDocument::mappings())
            .await
        {
            error!(error = %e, index = %self.monitor_index, "Error creating monitor index");
        }
    }

    /// One-line rendering of a status map
    pub fn summary(status: &BTreeMap<String, ServiceCheckResult>) -> String {
        status
            .iter()
            .map(|(name, result)| match result.latency_ms {
                Some(ms) => format!("{}: {} ({}ms)", name, result.status, ms),
                None => format!("{}: {} (?ms)", name, result.status),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Check, report and persist once
    pub async fn run_cycle(&mut self) -> Vec<Anomaly> {
        let status = self.check_all_services().await;
        info!("Service status: {}", Self::summary(&status));

        let anomalies = self.detect_anomalies();
        if !anomalies.is_empty() {
            let lines: Vec<String> = anomalies.iter().map(ToString::to_string).collect();
            warn!("Anomalies detected:\n{}", lines.join("\n"));
        }

        self.log_status(&status, &anomalies).await;
        anomalies
    }

    /// Run cycles every interval until `shutdown` flips to true
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.interval();
        info!(
            services = self.services.len(),
            interval_secs = interval.as_secs(),
            "Starting service monitor"
        );
        self.prepare_index().await;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if AssertUnwindSafe(self.run_cycle())
                .catch_unwind()
                .await
                .is_err()
            {
                error!("Monitoring cycle failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Service monitor stopped");
    }
}
