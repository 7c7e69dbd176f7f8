// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A bucketed histogram with lock-free recording.
//!
//! Bucket increments, the total count, and the sum are single atomic
//! operations; min and max converge through compare-and-swap loops.
//! Percentiles interpolate linearly inside the covering bucket.

use std::sync::atomic::{AtomicU64, Ordering};

/// Default boundaries, in milliseconds, suitable for network latencies
pub const DEFAULT_BOUNDARIES: &[f64] = &[
    0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0,
    10_000.0,
];

pub struct Histogram {
    /// Sorted upper bounds; observations above the last land in an overflow
    /// bucket with an infinite upper bound
    boundaries: Vec<f64>,
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    /// f64 bits
    sum: AtomicU64,
    /// f64 bits
    min: AtomicU64,
    /// f64 bits
    max: AtomicU64,
}

impl Histogram {
    pub fn new(boundaries: &[f64]) -> Self {
        debug_assert!(
            boundaries.windows(2).all(|w| w[0] < w[1]),
            "histogram boundaries must be sorted and distinct"
        );

        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            boundaries: boundaries.to_vec(),
            buckets,
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0f64.to_bits()),
            min: AtomicU64::new(f64::INFINITY.to_bits()),
            max: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
        }
    }

    /// Records an observation. The bucket chosen is the first whose
    /// boundary is >= the value.
    pub fn record(&self, value: f64) {
        let index = self
            .boundaries
            .iter()
            .position(|boundary| value <= *boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[index].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        fetch_update_f64(&self.sum, |sum| Some(sum + value));
        fetch_update_f64(&self.min, |min| (value < min).then_some(value));
        fetch_update_f64(&self.max, |max| (value > max).then_some(value));
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    /// The smallest recorded value; `None` before the first record
    pub fn min(&self) -> Option<f64> {
        let min = f64::from_bits(self.min.load(Ordering::Relaxed));
        min.is_finite().then_some(min)
    }

    /// The largest recorded value; `None` before the first record
    pub fn max(&self) -> Option<f64> {
        let max = f64::from_bits(self.max.load(Ordering::Relaxed));
        max.is_finite().then_some(max)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.sum() / count as f64
    }

    /// Estimates the `p`-quantile (`0.0..=1.0`) by linear interpolation
    /// between the covering bucket's bounds. The overflow bucket's infinite
    /// upper bound degrades to its lower bound.
    pub fn percentile(&self, p: f64) -> f64 {
        self.snapshot().percentile(p)
    }

    /// Takes a point-in-time copy of every counter
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            boundaries: self.boundaries.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            count: self.count(),
            sum: self.sum(),
            min: self.min(),
            max: self.max(),
        }
    }
}

fn fetch_update_f64(atomic: &AtomicU64, update: impl Fn(f64) -> Option<f64>) {
    let mut current = atomic.load(Ordering::Relaxed);
    while let Some(next) = update(f64::from_bits(current)) {
        match atomic.compare_exchange_weak(
            current,
            next.to_bits(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}

/// A point-in-time copy of a histogram's counters
#[derive(Clone, Debug, Default)]
pub struct HistogramSnapshot {
    pub boundaries: Vec<f64>,
    /// Per-bucket counts; one more entry than `boundaries` (overflow)
    pub buckets: Vec<u64>,
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl HistogramSnapshot {
    /// Cumulative counts at each boundary
    pub fn cumulative(&self) -> Vec<u64> {
        let mut total = 0;
        self.buckets
            .iter()
            .map(|count| {
                total += count;
                total
            })
            .collect()
    }

    /// Merges another snapshot with identical boundaries into this one
    pub fn merge(&mut self, other: &HistogramSnapshot) {
        if self.buckets.is_empty() {
            *self = other.clone();
            return;
        }
        debug_assert_eq!(self.boundaries, other.boundaries);

        for (bucket, other_bucket) in self.buckets.iter_mut().zip(&other.buckets) {
            *bucket += other_bucket;
        }
        self.count += other.count;
        self.sum += other.sum;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let p = p.clamp(0.0, 1.0);
        let target = p * self.count as f64;

        let mut cumulative_below = 0u64;
        for (index, bucket_count) in self.buckets.iter().enumerate() {
            let cumulative_at = cumulative_below + bucket_count;
            if (cumulative_at as f64) >= target {
                let lower = if index == 0 {
                    0.0
                } else {
                    self.boundaries[index - 1]
                };

                // the overflow bucket has no finite upper bound
                if index == self.boundaries.len() {
                    return lower;
                }
                let upper = self.boundaries[index];

                if *bucket_count == 0 {
                    return lower;
                }
                let fraction = (target - cumulative_below as f64) / *bucket_count as f64;
                return lower + (upper - lower) * fraction.clamp(0.0, 1.0);
            }
            cumulative_below = cumulative_at;
        }

        self.boundaries.last().copied().unwrap_or(0.0)
    }
}
