// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Global tracing configuration and the span export pipeline.
//!
//! One configuration per process. Ended spans whose context carries the
//! sampled flag are handed to the configured exporter, then to every
//! registered processor callback.

use crate::{context::TraceContext, span::SpanData};
use once_cell::sync::Lazy;
use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

/// Where ended spans are sent
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExporterKind {
    /// Spans are dropped after the processors run
    #[default]
    None,
    /// Spans are logged through `tracing`
    Console,
    OtlpGrpc,
    OtlpHttp,
    Jaeger,
    Zipkin,
}

/// The sampling policy applied at root-span creation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Sampler {
    #[default]
    AlwaysOn,
    AlwaysOff,
    /// Samples when the leading trace-id bits fall under `sample_rate`
    TraceId,
    /// Inherits the parent's decision; falls back to `TraceId` at the root
    ParentBased,
}

/// Batch-export tuning; honored by the OTLP exporters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    pub max_queue_size: usize,
    pub schedule_delay: Duration,
    pub export_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            schedule_delay: Duration::from_secs(5),
            export_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TracingConfig {
    pub exporter: ExporterKind,
    pub service_name: String,
    pub service_namespace: String,
    pub service_version: String,
    pub service_instance: String,
    pub sampler: Sampler,
    /// Applied by the `TraceId` and `ParentBased` samplers; `0.0..=1.0`
    pub sample_rate: f64,
    pub batch: BatchConfig,
    /// Collector URL for the network exporters
    pub endpoint: String,
    pub insecure: bool,
    pub debug: bool,
}

impl TracingConfig {
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_exporter(mut self, exporter: ExporterKind) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn with_sampler(mut self, sampler: Sampler, sample_rate: f64) -> Self {
        self.sampler = sampler;
        self.sample_rate = sample_rate;
        self
    }
}

type Processor = Arc<dyn Fn(&SpanData) + Send + Sync>;

struct TracerState {
    config: TracingConfig,
    processors: Vec<Processor>,
}

static TRACER: Lazy<RwLock<TracerState>> = Lazy::new(|| {
    RwLock::new(TracerState {
        config: TracingConfig {
            sampler: Sampler::AlwaysOn,
            sample_rate: 1.0,
            ..Default::default()
        },
        processors: Vec::new(),
    })
});

/// Installs the process-wide tracing configuration
pub fn configure(config: TracingConfig) {
    TRACER.write().unwrap().config = config;
}

/// Returns a copy of the active configuration
pub fn config() -> TracingConfig {
    TRACER.read().unwrap().config.clone()
}

/// Registers a callback invoked with every ended span, after the exporter
pub fn add_processor(processor: impl Fn(&SpanData) + Send + Sync + 'static) {
    TRACER.write().unwrap().processors.push(Arc::new(processor));
}

/// Removes all registered processors; tests use this for isolation
pub fn clear_processors() {
    TRACER.write().unwrap().processors.clear();
}

pub(crate) fn should_sample(parent: &TraceContext, trace_id: &[u8; 16]) -> bool {
    let config = config();
    match config.sampler {
        Sampler::AlwaysOn => true,
        Sampler::AlwaysOff => false,
        Sampler::TraceId => trace_id_decision(trace_id, config.sample_rate),
        Sampler::ParentBased => {
            if parent.is_valid() {
                parent.is_sampled()
            } else {
                trace_id_decision(trace_id, config.sample_rate)
            }
        }
    }
}

fn trace_id_decision(trace_id: &[u8; 16], sample_rate: f64) -> bool {
    let rate = sample_rate.clamp(0.0, 1.0);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&trace_id[..8]);
    let value = u64::from_be_bytes(prefix);
    if rate == 0.0 {
        return false;
    }
    (value as f64) <= rate * u64::MAX as f64
}

/// Hands an ended span to the exporter, then to the processors. The
/// sampled flag gates the exporter; processors always run.
pub(crate) fn export(span: &SpanData) {
    let (config, processors) = {
        let state = TRACER.read().unwrap();
        (state.config.clone(), state.processors.clone())
    };

    if span.context.is_sampled() {
        emit(&config, span);
    }

    for processor in &processors {
        processor(span);
    }
}

fn emit(config: &TracingConfig, span: &SpanData) {
    match config.exporter {
        ExporterKind::None => {}
        ExporterKind::Console => {
            let duration = span
                .end
                .and_then(|end| end.duration_since(span.start).ok())
                .unwrap_or_default();
            tracing::info!(
                target: "tern::span",
                service = %config.service_name,
                name = %span.name,
                trace_id = %span.context,
                kind = ?span.kind,
                status = ?span.status,
                duration_us = duration.as_micros() as u64,
                attributes = span.attributes.len(),
                events = span.events.len(),
            );
        }
        // the network exporters are configuration surface only; the wire
        // protocols live outside this crate
        exporter => {
            tracing::debug!(
                target: "tern::span",
                exporter = ?exporter,
                endpoint = %config.endpoint,
                name = %span.name,
                "span export delegated"
            );
        }
    }
}
