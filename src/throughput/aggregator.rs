//! Median aggregation of throughput samples.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use serde::Serialize;

use super::Sample;

/// Snapshot of an aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateResult {
    pub median_mbps: f64,
    pub sample_count: usize,
}

/// Median of `samples`; `0.0` for an empty slice.
///
/// Odd counts return the middle element, even counts the mean of the two
/// middle elements.
pub fn aggregate(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Total-order wrapper so throughput values can live in a heap.
#[derive(Debug, Clone, Copy)]
struct Ranked(f64);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Growing sample set with a running median.
///
/// Used both for the live figure (fed every progress sample) and for the final
/// figure (fed each probe's final sample). The lower half sits in a max-heap,
/// the upper half in a min-heap, and `lower` holds at most one extra value, so
/// a push is O(log n) and reading the median is O(1). Agrees with
/// [`aggregate`] over the same values.
#[derive(Debug, Default, Clone)]
pub struct SpeedAggregator {
    lower: BinaryHeap<Ranked>,
    upper: BinaryHeap<Reverse<Ranked>>,
}

impl SpeedAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an aggregator from already collected samples.
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Self {
        let mut agg = Self::new();
        for s in samples {
            agg.insert(s.value);
        }
        agg
    }

    /// Add a value and return the updated aggregate. Non-finite values are dropped.
    pub fn push(&mut self, value: f64) -> AggregateResult {
        self.insert(value);
        self.result()
    }

    fn insert(&mut self, value: f64) {
        if !value.is_finite() {
            tracing::debug!(value, "discarding non-finite sample");
            return;
        }

        match self.lower.peek() {
            Some(top) if value > top.0 => self.upper.push(Reverse(Ranked(value))),
            _ => self.lower.push(Ranked(value)),
        }

        if self.lower.len() > self.upper.len() + 1 {
            if let Some(v) = self.lower.pop() {
                self.upper.push(Reverse(v));
            }
        } else if self.upper.len() > self.lower.len() {
            if let Some(Reverse(v)) = self.upper.pop() {
                self.lower.push(v);
            }
        }
    }

    fn median(&self) -> f64 {
        match (self.lower.peek(), self.upper.peek()) {
            (Some(lo), Some(Reverse(hi))) if self.lower.len() == self.upper.len() => {
                (lo.0 + hi.0) / 2.0
            }
            (Some(lo), _) => lo.0,
            _ => 0.0,
        }
    }

    pub fn result(&self) -> AggregateResult {
        AggregateResult {
            median_mbps: self.median(),
            sample_count: self.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len() + self.upper.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Drop all samples, ready for the next test cycle.
    pub fn clear(&mut self) {
        self.lower.clear();
        self.upper.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(aggregate(&[]), 0.0);
        assert_eq!(SpeedAggregator::new().result(), AggregateResult::default());
    }

    #[test]
    fn test_known_medians() {
        assert_eq!(aggregate(&[5.0]), 5.0);
        assert_eq!(aggregate(&[2.0, 8.0]), 5.0);
        assert_eq!(aggregate(&[1.0, 3.0, 5.0]), 3.0);
        assert_eq!(aggregate(&[5.0, 1.0, 3.0]), 3.0);
        assert_eq!(aggregate(&[9.0, 1.0, 4.0, 2.0]), 3.0);
    }

    #[test]
    fn test_outlier_does_not_dominate() {
        let median = aggregate(&[95.0, 98.0, 101.0, 0.0, 4000.0]);
        assert_eq!(median, 98.0);
    }

    #[test]
    fn test_median_within_bounds() {
        let sets: [&[f64]; 5] = [
            &[0.0, 0.0, 0.0],
            &[12.5, 3.25],
            &[100.0, 0.0, 55.5, 55.5, 7.0, 1e6],
            &[-1.0, 1.0],
            &[42.0, 41.9, 42.1, 40.0, 43.7, 39.2, 44.4],
        ];
        for set in sets {
            let min = set.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = set.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let m = aggregate(set);
            assert!(m >= min && m <= max, "median {} outside [{}, {}]", m, min, max);
        }
    }

    #[test]
    fn test_aggregator_tracks_live_median() {
        let mut agg = SpeedAggregator::new();
        assert_eq!(agg.push(10.0).median_mbps, 10.0);
        assert_eq!(agg.push(20.0).median_mbps, 15.0);
        let r = agg.push(f64::NAN);
        assert_eq!(r.sample_count, 2);
        let r = agg.push(12.0);
        assert_eq!(r.median_mbps, 12.0);
        assert_eq!(r.sample_count, 3);

        agg.clear();
        assert!(agg.is_empty());
        assert_eq!(agg.result().median_mbps, 0.0);
    }

    #[test]
    fn test_running_median_matches_sorted_median() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut agg = SpeedAggregator::new();
        let mut seen = Vec::new();
        for i in 0..500 {
            // Plenty of repeats, zeros and jumps between regimes.
            let value = match i % 7 {
                0 => 0.0,
                1 => 80.0,
                _ => rng.gen_range(0.0..2000.0_f64).round(),
            };
            seen.push(value);
            let r = agg.push(value);
            assert_eq!(r.sample_count, seen.len());
            assert_eq!(r.median_mbps, aggregate(&seen), "after {} values", seen.len());
        }
    }

    #[test]
    fn test_descending_and_ascending_runs() {
        let mut agg = SpeedAggregator::new();
        let mut seen = Vec::new();
        for v in (0..50).rev().chain(0..50).map(f64::from) {
            seen.push(v);
            assert_eq!(agg.push(v).median_mbps, aggregate(&seen));
        }
    }

    #[test]
    fn test_many_pushes_stay_cheap() {
        let mut agg = SpeedAggregator::new();
        let started = std::time::Instant::now();
        for i in 0..200_000u32 {
            agg.push(f64::from(i % 1000));
        }
        assert_eq!(agg.len(), 200_000);
        assert_eq!(agg.result().median_mbps, 499.5);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }
}
