//! Bounded FIFO of recent measurements.

use super::Measurement;
use std::collections::VecDeque;

/// Keeps at most `capacity` measurements; pushing into a full history evicts the oldest.
#[derive(Clone, Debug)]
pub struct MeasurementHistory {
    entries: VecDeque<Measurement>,
    capacity: usize,
}

impl MeasurementHistory {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Appends, evicting the oldest entries while full.
    pub fn push(&mut self, measurement: Measurement) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(measurement);
    }

    /// Number of stored measurements.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of stored measurements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest measurement.
    pub fn latest(&self) -> Option<&Measurement> {
        self.entries.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        self.entries.iter()
    }

    /// Copy of every measurement, oldest first.
    pub fn to_vec(&self) -> Vec<Measurement> {
        self.entries.iter().cloned().collect()
    }

    /// Drops every measurement.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
