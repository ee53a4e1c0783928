//! Consumer metrics collection

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters shared between the consumer loop and the message processor
#[derive(Debug)]
pub struct ConsumerMetrics {
    messages_consumed: AtomicU64,
    messages_processed: AtomicU64,
    messages_dead_lettered: AtomicU64,
    retries: AtomicU64,
    offsets_committed: AtomicU64,
    commit_failures: AtomicU64,
    reconnects: AtomicU64,
    processing_micros: AtomicU64,
    start_time: Instant,
}

/// Point-in-time copy of [`ConsumerMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Messages handed to the processor
    pub messages_consumed: u64,
    /// Messages processed successfully
    pub messages_processed: u64,
    /// Messages routed to the dead-letter store
    pub messages_dead_lettered: u64,
    /// Failed handler attempts that were retried
    pub retries: u64,
    /// Offsets committed
    pub offsets_committed: u64,
    /// Commits that failed
    pub commit_failures: u64,
    /// Reconnection attempts
    pub reconnects: u64,
    /// Mean handler time of successful messages in milliseconds
    pub avg_processing_ms: f64,
    /// Seconds since the metrics were created
    pub uptime_secs: u64,
}

impl Default for ConsumerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            messages_consumed: AtomicU64::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dead_lettered: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            offsets_committed: AtomicU64::new(0),
            commit_failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            processing_micros: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a message read from the log
    pub fn increment_consumed(&self) {
        self.messages_consumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successfully processed message and its handler time
    pub fn record_processed(&self, duration: Duration) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.processing_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a failed attempt
    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dead-lettered message
    pub fn increment_dead_lettered(&self) {
        self.messages_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed offset
    pub fn increment_committed(&self) {
        self.offsets_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed commit
    pub fn increment_commit_failures(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reconnection attempt
    pub fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values
    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.messages_processed.load(Ordering::Relaxed);
        let micros = self.processing_micros.load(Ordering::Relaxed);
        MetricsSnapshot {
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            messages_processed: processed,
            messages_dead_lettered: self.messages_dead_lettered.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            offsets_committed: self.offsets_committed.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            avg_processing_ms: if processed == 0 {
                0.0
            } else {
                micros as f64 / processed as f64 / 1000.0
            },
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}
