use std::collections::VecDeque;
use std::time::Duration;

use super::metrics::Sample;

/// Bounded FIFO of recent samples, used as the baseline for cumulative
/// counter deltas.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl HistoryRing {
    /// Ring size covering `alarm_window` at one sample per `interval`:
    /// `max(1, round(alarm_window / interval))`, rounding half to even.
    pub fn capacity_for(alarm_window: Duration, interval: Duration) -> usize {
        if interval.is_zero() {
            return 1;
        }
        let ratio = (alarm_window.as_secs_f64() / interval.as_secs_f64()).round_ties_even();
        (ratio as usize).max(1)
    }

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `sample`, returning the evicted oldest sample when full.
    pub fn push(&mut self, sample: Sample) -> Option<Sample> {
        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn oldest(&self) -> Option<&Sample> {
        self.samples.front()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
