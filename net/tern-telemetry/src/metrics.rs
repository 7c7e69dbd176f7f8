// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Aggregate counters and latency histograms for a transport endpoint

use crate::histogram::{Histogram, HistogramSnapshot, DEFAULT_BOUNDARIES};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    connections_accepted: AtomicU64,
    connections_active: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    errors: AtomicU64,
}

pub struct NetworkMetrics {
    counters: Counters,
    send_latency: Histogram,
    receive_latency: Histogram,
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self {
            counters: Counters::default(),
            send_latency: Histogram::new(DEFAULT_BOUNDARIES),
            receive_latency: Histogram::new(DEFAULT_BOUNDARIES),
        }
    }
}

impl NetworkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connection_accepted(&self) {
        self.counters
            .connections_accepted
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .connections_active
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_connection_closed(&self) {
        let previous = self
            .counters
            .connections_active
            .fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous > 0, "active connection count underflow");
    }

    pub fn on_message_sent(&self, bytes: usize, latency_ms: f64) {
        self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_sent
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.send_latency.record(latency_ms);
    }

    pub fn on_message_received(&self, bytes: usize, latency_ms: f64) {
        self.counters
            .messages_received
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.receive_latency.record(latency_ms);
    }

    pub fn on_error(&self) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error_count(&self) -> u64 {
        self.counters.errors.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> u64 {
        self.counters.connections_active.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.counters.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.counters.connections_active.load(Ordering::Relaxed),
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            send_latency: self.send_latency.snapshot(),
            receive_latency: self.receive_latency.snapshot(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors: u64,
    pub send_latency: HistogramSnapshot,
    pub receive_latency: HistogramSnapshot,
}
