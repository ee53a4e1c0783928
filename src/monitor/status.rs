//! Service check results and snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Health classification of one backing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Answered and reported itself fit
    Healthy,
    /// Answered with a less-than-ideal report
    Degraded,
    /// Failed, timed out or is not configured
    Down,
}

impl ServiceStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Down => "down",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of checking one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCheckResult {
    /// Classification
    pub status: ServiceStatus,
    /// Probe latency in milliseconds, present only when the probe completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    /// Failure message, present only when the probe failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Service-specific extras
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

impl ServiceCheckResult {
    /// A probe that answered, with its latency rounded to two decimals
    pub fn completed(
        status: ServiceStatus,
        latency_ms: f64,
        details: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            status,
            latency_ms: Some(round2(latency_ms)),
            error: None,
            details,
        }
    }

    /// A probe that failed
    pub fn down(error: impl Into<String>, details: Option<Map<String, Value>>) -> Self {
        Self {
            status: ServiceStatus::Down,
            latency_ms: None,
            error: Some(error.into()),
            details,
        }
    }

    /// Whether the service is down
    pub fn is_down(&self) -> bool {
        self.status == ServiceStatus::Down
    }
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Results of one check cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// When the cycle ran
    pub timestamp: DateTime<Utc>,
    /// Results keyed by service name
    pub services: BTreeMap<String, ServiceCheckResult>,
}

impl StatusSnapshot {
    /// Snapshot taken now
    pub fn new(services: BTreeMap<String, ServiceCheckResult>) -> Self {
        Self {
            timestamp: Utc::now(),
            services,
        }
    }

    /// Result for `service`, if it was checked
    pub fn get(&self, service: &str) -> Option<&ServiceCheckResult> {
        self.services.get(service)
    }
}
