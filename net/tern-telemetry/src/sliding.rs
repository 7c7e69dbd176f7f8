// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A histogram over a sliding time window.
//!
//! Observations land in fixed-duration time buckets; reads aggregate the
//! buckets that have not yet aged out of the window.

use crate::histogram::{Histogram, HistogramSnapshot};
use std::{
    collections::VecDeque,
    sync::Mutex,
    time::{Duration, Instant},
};

/// 60 second window split into 10 second buckets
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_BUCKET_COUNT: u32 = 6;

pub struct SlidingHistogram {
    boundaries: Vec<f64>,
    window: Duration,
    bucket_duration: Duration,
    buckets: Mutex<VecDeque<(Instant, Histogram)>>,
}

impl SlidingHistogram {
    pub fn new(boundaries: &[f64], window: Duration, bucket_count: u32) -> Self {
        let bucket_count = bucket_count.max(1);
        Self {
            boundaries: boundaries.to_vec(),
            window,
            bucket_duration: window / bucket_count,
            buckets: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_defaults(boundaries: &[f64]) -> Self {
        Self::new(boundaries, DEFAULT_WINDOW, DEFAULT_BUCKET_COUNT)
    }

    /// Records into the current time bucket, expiring aged-out buckets and
    /// opening a fresh bucket when the newest one is older than the bucket
    /// duration
    pub fn record(&self, value: f64) {
        self.record_at(value, Instant::now())
    }

    fn record_at(&self, value: f64, now: Instant) {
        let mut buckets = self.buckets.lock().unwrap();
        Self::expire(&mut buckets, self.window, now);

        let needs_new = match buckets.back() {
            Some((start, _)) => now.duration_since(*start) >= self.bucket_duration,
            None => true,
        };
        if needs_new {
            buckets.push_back((now, Histogram::new(&self.boundaries)));
        }

        buckets
            .back()
            .expect("a bucket was just ensured")
            .1
            .record(value);
    }

    /// Aggregates the live buckets into one snapshot
    pub fn aggregate(&self) -> HistogramSnapshot {
        self.aggregate_at(Instant::now())
    }

    fn aggregate_at(&self, now: Instant) -> HistogramSnapshot {
        let mut buckets = self.buckets.lock().unwrap();
        Self::expire(&mut buckets, self.window, now);

        let mut snapshot = HistogramSnapshot::default();
        for (_, histogram) in buckets.iter() {
            snapshot.merge(&histogram.snapshot());
        }
        if snapshot.boundaries.is_empty() {
            snapshot.boundaries = self.boundaries.clone();
            snapshot.buckets = vec![0; self.boundaries.len() + 1];
        }
        snapshot
    }

    fn expire(buckets: &mut VecDeque<(Instant, Histogram)>, window: Duration, now: Instant) {
        while let Some((start, _)) = buckets.front() {
            if now.duration_since(*start) > window {
                buckets.pop_front();
            } else {
                break;
            }
        }
    }
}
