// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Observability primitives: lock-free bucketed histograms, sliding
//! time-window aggregation, W3C trace context propagation, RAII spans, and
//! a globally configured span exporter.

pub mod context;
pub mod histogram;
pub mod metrics;
pub mod sliding;
pub mod span;
pub mod tracer;

pub use context::{current, TraceContext};
pub use histogram::{Histogram, HistogramSnapshot};
pub use metrics::NetworkMetrics;
pub use sliding::SlidingHistogram;
pub use span::{Span, SpanKind, SpanStatus};
pub use tracer::{BatchConfig, ExporterKind, Sampler, TracingConfig};
