// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! RAII spans.
//!
//! Constructing a span makes its context the thread's current context;
//! ending it (explicitly or on drop) restores the previous context and
//! hands the finished span to the exporter exactly once.

use crate::{
    context::{self, TraceContext},
    tracer,
};
use std::time::SystemTime;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Str(String),
    I64(i64),
    F64(f64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: SystemTime,
    pub attributes: Vec<(String, AttributeValue)>,
}

/// The immutable record of an ended span, as seen by exporters and
/// processors
#[derive(Clone, Debug)]
pub struct SpanData {
    pub name: String,
    pub context: TraceContext,
    pub kind: SpanKind,
    pub status: SpanStatus,
    pub status_description: Option<String>,
    pub attributes: Vec<(String, AttributeValue)>,
    pub events: Vec<SpanEvent>,
    pub start: SystemTime,
    pub end: Option<SystemTime>,
}

pub struct Span {
    data: SpanData,
    prior: TraceContext,
    ended: bool,
}

impl Span {
    /// Starts an internal span
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_kind(name, SpanKind::Internal)
    }

    /// Starts a span of the given kind as a child of the thread's current
    /// context, or as a sampled-per-config root when there is none
    pub fn with_kind(name: impl Into<String>, kind: SpanKind) -> Self {
        let parent = context::current();
        let span_context = if parent.is_valid() {
            parent.create_child()
        } else {
            let root = TraceContext::new_root(true);
            let sampled = tracer::should_sample(&parent, root.trace_id());
            root.with_sampled(sampled)
        };

        let prior = context::set_current(span_context.clone());

        Self {
            data: SpanData {
                name: name.into(),
                context: span_context,
                kind,
                status: SpanStatus::Unset,
                status_description: None,
                attributes: Vec::new(),
                events: Vec::new(),
                start: SystemTime::now(),
                end: None,
            },
            prior,
            ended: false,
        }
    }

    pub fn context(&self) -> &TraceContext {
        &self.data.context
    }

    /// No-op once the span has ended
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if self.ended {
            return;
        }
        self.data.attributes.push((key.into(), value.into()));
    }

    /// No-op once the span has ended
    pub fn add_event(&mut self, name: impl Into<String>) {
        self.add_event_with_attributes(name, Vec::new());
    }

    /// No-op once the span has ended
    pub fn add_event_with_attributes(
        &mut self,
        name: impl Into<String>,
        attributes: Vec<(String, AttributeValue)>,
    ) {
        if self.ended {
            return;
        }
        self.data.events.push(SpanEvent {
            name: name.into(),
            timestamp: SystemTime::now(),
            attributes,
        });
    }

    /// No-op once the span has ended
    pub fn set_status(&mut self, status: SpanStatus, description: Option<&str>) {
        if self.ended {
            return;
        }
        self.data.status = status;
        self.data.status_description = description.map(str::to_string);
    }

    /// Marks the span failed and records an `exception` event carrying the
    /// message. No-op once the span has ended.
    pub fn set_error(&mut self, message: &str) {
        if self.ended {
            return;
        }
        self.data.status = SpanStatus::Error;
        self.data.status_description = Some(message.to_string());
        self.add_event_with_attributes(
            "exception",
            vec![("exception.message".to_string(), message.into())],
        );
    }

    /// Ends the span: records the end time, restores the prior thread-local
    /// context, and exports. Subsequent calls are no-ops.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.data.end = Some(SystemTime::now());
        context::set_current(self.prior.clone());
        tracer::export(&self.data);
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::current;
    use std::sync::{Arc, Mutex};

    #[test]
    fn current_context_nesting_test() {
        assert!(!current().is_valid());

        let root = Span::with_kind("rpc.call", SpanKind::Server);
        let root_context = root.context().clone();
        assert_eq!(current(), root_context);

        {
            let child = Span::with_kind("tx.write", SpanKind::Client);
            assert_eq!(current(), *child.context());
            assert_eq!(child.context().trace_id(), root_context.trace_id());
            assert_eq!(
                child.context().parent_span_id(),
                Some(root_context.span_id())
            );

            // the serialized current context parses back to the child
            let captured = current().to_traceparent();
            let reparsed = crate::context::TraceContext::from_traceparent(&captured);
            assert_eq!(reparsed.trace_id(), root_context.trace_id());
        }

        // child drop restored the root
        assert_eq!(current(), root_context);
        drop(root);
        assert!(!current().is_valid());
    }

    #[test]
    fn end_is_idempotent_test() {
        let exported = Arc::new(Mutex::new(0));
        let observed = exported.clone();
        // other tests end spans concurrently; count only this test's span
        tracer::add_processor(move |span| {
            if span.name == "span.end.once" {
                *observed.lock().unwrap() += 1;
            }
        });

        let mut span = Span::new("span.end.once");
        span.end();
        span.end();
        drop(span);

        assert_eq!(*exported.lock().unwrap(), 1);
    }

    #[test]
    fn mutation_after_end_is_noop_test() {
        let mut span = Span::new("frozen");
        span.set_attribute("before", true);
        span.end();

        span.set_attribute("after", true);
        span.add_event("after");
        span.set_status(SpanStatus::Ok, None);

        assert_eq!(span.data.attributes.len(), 1);
        assert!(span.data.events.is_empty());
        assert_eq!(span.data.status, SpanStatus::Unset);
    }

    #[test]
    fn set_error_records_exception_event_test() {
        let mut span = Span::new("failing");
        span.set_error("boom");

        assert_eq!(span.data.status, SpanStatus::Error);
        assert_eq!(span.data.status_description.as_deref(), Some("boom"));

        let event = span.data.events.last().unwrap();
        assert_eq!(event.name, "exception");
        assert_eq!(
            event.attributes[0],
            (
                "exception.message".to_string(),
                AttributeValue::Str("boom".to_string())
            )
        );
        span.end();
    }
}
