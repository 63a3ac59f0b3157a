//! Bounded, time-ordered snapshot series for one source

use std::collections::VecDeque;

use crate::models::{MetricSnapshot, TimeRange};

/// Per-source snapshots in insertion (= time) order, capped FIFO
#[derive(Debug, Clone)]
pub struct MetricSeries {
    snapshots: VecDeque<MetricSnapshot>,
    max_len: usize,
}

impl MetricSeries {
    pub fn new(max_len: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            max_len: max_len.max(1),
        }
    }

    /// Append a snapshot. Snapshots older than the newest stored one are
    /// rejected so timestamps stay non-decreasing; returns whether it was kept.
    pub fn push(&mut self, snapshot: MetricSnapshot) -> bool {
        if let Some(last) = self.snapshots.back() {
            if snapshot.timestamp < last.timestamp {
                return false;
            }
        }
        self.snapshots.push_back(snapshot);
        while self.snapshots.len() > self.max_len {
            self.snapshots.pop_front();
        }
        true
    }

    /// Drop snapshots older than `cutoff`; returns how many were removed
    pub fn prune_before(&mut self, cutoff: i64) -> usize {
        let before = self.snapshots.len();
        while self
            .snapshots
            .front()
            .map(|s| s.timestamp < cutoff)
            .unwrap_or(false)
        {
            self.snapshots.pop_front();
        }
        before - self.snapshots.len()
    }

    pub fn latest(&self) -> Option<&MetricSnapshot> {
        self.snapshots.back()
    }

    pub fn in_range(&self, range: &TimeRange) -> Vec<MetricSnapshot> {
        self.snapshots
            .iter()
            .filter(|s| range.contains(s.timestamp))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSnapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_len
    }
}
