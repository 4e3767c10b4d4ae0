//! Rolling stores for continuous learning
//!
//! This module holds the two bounded queues the controller keeps between
//! cycles: the sample ring buffer fed by [`add_data_point`] and the history of
//! performance snapshots. Both evict their oldest entry when full.
//!
//! [`add_data_point`]: crate::service::SleepLearningService::add_data_point

use crate::types::{PerformanceSnapshot, ProcessedSample};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Default ring buffer capacity
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Default number of performance snapshots kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Bounded FIFO of recent processed samples
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: VecDeque<ProcessedSample>,
    capacity: usize,
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, returning the evicted oldest sample when full
    pub fn push(&mut self, sample: ProcessedSample) -> Option<ProcessedSample> {
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front()
        } else {
            None
        }
    }

    pub fn extend(&mut self, samples: impl IntoIterator<Item = ProcessedSample>) {
        for sample in samples {
            self.push(sample);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Owned copy of every buffered sample, oldest first
    pub fn snapshot(&self) -> Vec<ProcessedSample> {
        self.samples.iter().copied().collect()
    }

    /// Drop leading samples stamped at or before `cutoff`, returning how many
    /// were removed. Samples appended after `cutoff` are kept.
    pub fn drain_through(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut drained = 0;
        while self
            .samples
            .front()
            .map_or(false, |sample| sample.timestamp <= cutoff)
        {
            self.samples.pop_front();
            drained += 1;
        }
        drained
    }
}

/// Bounded accuracy-over-time history
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceHistory {
    snapshots: VecDeque<PerformanceSnapshot>,
    capacity: usize,
}

impl Default for PerformanceHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl PerformanceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, snapshot: PerformanceSnapshot) {
        self.snapshots.push_back(snapshot);
        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
    }

    /// Most recent snapshot
    pub fn last(&self) -> Option<&PerformanceSnapshot> {
        self.snapshots.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PerformanceSnapshot> {
        self.snapshots.iter()
    }
}
