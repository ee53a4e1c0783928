//! Resilient event consumption and backing-service health monitoring
//!
//! Two cooperating components:
//!
//! - [`consumer`]: reads JSON events from an event log (Kafka with the
//!   `kafka` feature), routes them to per-topic handlers with bounded retries,
//!   commits offsets only after success, dead-letters poison messages and
//!   reconnects with exponential backoff.
//! - [`monitor`]: checks every backing service on an interval, keeps a
//!   sliding window of snapshots, flags outages and latency spikes and
//!   persists each snapshot to the observability [`sink`].
//!
//! # Example
//!
//! ```no_run
//! use cypher_pipeline::config::MonitorConfig;
//! use cypher_pipeline::monitor::{ServiceMonitor, ServiceRegistry};
//!
//! # async fn example() {
//! let services = ServiceRegistry::new().into_services();
//! let mut monitor = ServiceMonitor::new(services, MonitorConfig::default());
//!
//! let anomalies = monitor.run_cycle().await;
//! for anomaly in anomalies {
//!     tracing::warn!("{}", anomaly);
//! }
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

/// Configuration loading and validation
pub mod config;

/// Event log consumer pipeline
pub mod consumer;

/// Error types
pub mod error;

/// Backing-service health monitor
pub mod monitor;

/// Index-and-query sink for lifecycle events and snapshots
pub mod sink;

/// Logging and tracing setup
pub mod telemetry;

pub use config::{MonitorConfig, PipelineConfig, SinkConfig};
pub use error::{PipelineError, Result};
