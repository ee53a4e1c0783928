//! Sliding window of recent status snapshots

use super::status::StatusSnapshot;
use std::collections::VecDeque;

/// Default number of snapshots kept
pub const DEFAULT_WINDOW_CAPACITY: usize = 10;

/// Fixed-capacity FIFO of snapshots, oldest first
#[derive(Debug, Clone)]
pub struct StatusWindow {
    capacity: usize,
    snapshots: VecDeque<StatusSnapshot>,
}

impl Default for StatusWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl StatusWindow {
    /// Create an empty window; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            snapshots: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a snapshot, evicting the oldest past capacity
    pub fn push(&mut self, snapshot: StatusSnapshot) {
        while self.snapshots.len() >= self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    /// Most recent snapshot
    pub fn latest(&self) -> Option<&StatusSnapshot> {
        self.snapshots.back()
    }

    /// The last `n` snapshots, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &StatusSnapshot> {
        let skip = self.snapshots.len().saturating_sub(n);
        self.snapshots.iter().skip(skip)
    }

    /// All snapshots, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &StatusSnapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
