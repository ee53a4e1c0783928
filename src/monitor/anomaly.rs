//! Trend-based anomaly detection over the status window

use super::status::ServiceStatus;
use super::window::StatusWindow;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A noteworthy condition in the latest snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Anomaly {
    /// The service was reported down
    ServiceDown { service: String },
    /// Latency more than `spike_factor` times the recent average
    LatencySpike {
        service: String,
        current_ms: f64,
        average_ms: f64,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::ServiceDown { service } => write!(f, "Service {} is DOWN", service),
            Anomaly::LatencySpike {
                service,
                current_ms,
                average_ms,
            } => write!(
                f,
                "High latency detected for {}: {}ms (avg: {:.2}ms)",
                service, current_ms, average_ms
            ),
        }
    }
}

/// Thresholds for anomaly detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyDetector {
    /// Snapshots required before anything is reported
    pub min_snapshots: usize,
    /// Snapshots (latest included) averaged into the latency baseline
    pub baseline_len: usize,
    /// Ratio of current latency to baseline that counts as a spike
    pub spike_factor: f64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self {
            min_snapshots: 3,
            baseline_len: 3,
            spike_factor: 2.0,
        }
    }
}

impl AnomalyDetector {
    /// Inspect the latest snapshot of `window`.
    ///
    /// Services are reported in name order; a down service is never also
    /// reported as a latency spike.
    pub fn detect(&self, window: &StatusWindow) -> Vec<Anomaly> {
        if window.len() < self.min_snapshots {
            return Vec::new();
        }
        let Some(latest) = window.latest() else {
            return Vec::new();
        };

        let mut anomalies = Vec::new();
        for (service, result) in &latest.services {
            if result.status == ServiceStatus::Down {
                anomalies.push(Anomaly::ServiceDown {
                    service: service.clone(),
                });
                continue;
            }
            let Some(current_ms) = result.latency_ms else {
                continue;
            };

            let samples: Vec<f64> = window
                .recent(self.baseline_len)
                .filter_map(|snapshot| snapshot.get(service).and_then(|r| r.latency_ms))
                .collect();
            if samples.len() < self.baseline_len.max(1) {
                continue;
            }
            let average_ms = samples.iter().sum::<f64>() / samples.len() as f64;
            if current_ms > average_ms * self.spike_factor {
                anomalies.push(Anomaly::LatencySpike {
                    service: service.clone(),
                    current_ms,
                    average_ms,
                });
            }
        }
        anomalies
    }
}
