//! Rolling throughput accounting for the producer pool.
//!
//! Shards report their per-tick attempted counts into a shared window
//! keyed by tick index; counts for the same tick merge into one bucket, so
//! the window holds per-tick aggregates across shards. The moving average
//! is the integer mean of the most recent buckets.
//!
//! Reads are snapshots and may be stale; the mutex rules out torn reads.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tick: u64,
    count: u64,
}

/// Ring of per-tick aggregate insert counts.
#[derive(Debug)]
pub struct ThroughputWindow {
    buckets: Mutex<VecDeque<Bucket>>,
    capacity: usize,
}

impl Default for ThroughputWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputWindow {
    /// Number of per-tick buckets retained.
    pub const DEFAULT_CAPACITY: usize = 300;

    /// Creates a window with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Creates a window retaining at most `capacity` buckets.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Records `count` attempted inserts for tick `tick`, merging with any
    /// bucket already recorded for that tick by another shard.
    pub fn record(&self, tick: u64, count: u64) {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(bucket) = buckets.iter_mut().rev().find(|b| b.tick == tick) {
            bucket.count += count;
            return;
        }

        // Shards tick in near lockstep, so new buckets almost always land
        // at the back; out-of-order ticks are inserted in position.
        let at = buckets
            .iter()
            .rposition(|b| b.tick < tick)
            .map_or(0, |p| p + 1);
        buckets.insert(at, Bucket { tick, count });
        while buckets.len() > self.capacity {
            buckets.pop_front();
        }
    }

    /// Number of buckets currently retained.
    pub fn len(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integer mean of the last `min(len, window)` buckets; zero when the
    /// window is empty. Undercounts during the first `window` seconds of a
    /// run by construction.
    pub fn moving_average(&self, window: usize) -> u64 {
        let buckets = self
            .buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let n = buckets.len().min(window.max(1));
        if n == 0 {
            return 0;
        }
        let sum: u64 = buckets.iter().rev().take(n).map(|b| b.count).sum();
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let mean = (sum as f64 / n as f64).round() as u64;
        mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_reports_zero() {
        let window = ThroughputWindow::new();
        assert_eq!(window.moving_average(10), 0);
        assert!(window.is_empty());
    }

    #[test]
    fn single_bucket_reports_its_value() {
        let window = ThroughputWindow::new();
        window.record(0, 137);
        assert_eq!(window.moving_average(10), 137);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn counts_for_the_same_tick_merge() {
        let window = ThroughputWindow::new();
        window.record(0, 500);
        window.record(0, 500);
        assert_eq!(window.len(), 1);
        assert_eq!(window.moving_average(10), 1000);
    }

    #[test]
    fn moving_average_is_rounded_mean_of_full_window() {
        let window = ThroughputWindow::new();
        let values = [10u64, 20, 30, 41];
        for (tick, v) in values.iter().enumerate() {
            window.record(tick as u64, *v);
        }
        // mean = 25.25 -> 25
        assert_eq!(window.moving_average(4), 25);
        // window of 2: mean(30, 41) = 35.5 -> 36
        assert_eq!(window.moving_average(2), 36);
    }

    #[test]
    fn window_shorter_than_history_uses_recent_buckets() {
        let window = ThroughputWindow::new();
        for tick in 0..20u64 {
            window.record(tick, tick * 10);
        }
        // last 10 ticks: 100..=190, mean 145
        assert_eq!(window.moving_average(10), 145);
    }

    #[test]
    fn capacity_is_enforced() {
        let window = ThroughputWindow::with_capacity(5);
        for tick in 0..50u64 {
            window.record(tick, 1);
        }
        assert_eq!(window.len(), 5);
    }

    #[test]
    fn out_of_order_ticks_merge_into_existing_buckets() {
        let window = ThroughputWindow::new();
        window.record(0, 10);
        window.record(1, 20);
        window.record(0, 5);
        assert_eq!(window.len(), 2);
        // buckets: (0, 15), (1, 20)
        assert_eq!(window.moving_average(2), 18);
    }

    #[test]
    fn late_tick_without_bucket_inserts_in_order() {
        let window = ThroughputWindow::new();
        window.record(2, 30);
        window.record(0, 10);
        assert_eq!(window.len(), 2);
        // most recent bucket is still tick 2
        assert_eq!(window.moving_average(1), 30);
    }
}
