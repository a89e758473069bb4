//! Fixed-capacity rolling window for one metric

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Statistics over a full window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollingStats {
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub max: f64,
    pub min: f64,
    pub range: f64,
}

#[derive(Debug, Clone)]
pub struct RollingBuffer {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    /// Append, evicting the oldest value beyond capacity
    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Window statistics, only once the buffer holds exactly `capacity` values
    pub fn stats(&self) -> Option<RollingStats> {
        if !self.is_full() {
            return None;
        }
        let n = self.values.len() as f64;
        let mean = self.values.iter().sum::<f64>() / n;
        let variance = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let max = self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = self.values.iter().copied().fold(f64::INFINITY, f64::min);
        Some(RollingStats {
            mean,
            std: variance.sqrt(),
            max,
            min,
            range: max - min,
        })
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_stats_only_when_full() {
        let mut buffer = RollingBuffer::new(4);
        for v in [1.0, 2.0, 3.0] {
            buffer.push(v);
            assert!(buffer.stats().is_none());
        }
        buffer.push(4.0);
        let stats = buffer.stats().unwrap();
        assert_abs_diff_eq!(stats.mean, 2.5);
        assert_abs_diff_eq!(stats.std, 1.25f64.sqrt(), epsilon = 1e-12);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.range, 3.0);
    }

    #[test]
    fn test_eviction_keeps_latest() {
        let mut buffer = RollingBuffer::new(2);
        for v in [10.0, 20.0, 30.0] {
            buffer.push(v);
        }
        assert_eq!(buffer.len(), 2);
        let stats = buffer.stats().unwrap();
        assert_eq!(stats.min, 20.0);
        assert_eq!(stats.max, 30.0);
    }

    #[test]
    fn test_constant_window_has_zero_spread() {
        let mut buffer = RollingBuffer::new(3);
        for _ in 0..3 {
            buffer.push(7.0);
        }
        let stats = buffer.stats().unwrap();
        assert_eq!(stats.std, 0.0);
        assert_eq!(stats.range, 0.0);
    }
}
