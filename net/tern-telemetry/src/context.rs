// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! W3C Trace Context.
//!
//! `traceparent` is the only propagation header implemented:
//! `00-{32 hex trace id}-{16 hex span id}-{2 hex flags}`. Parsing never
//! fails; malformed input yields an invalid context.

use std::{cell::RefCell, fmt};

pub const SAMPLED_FLAG: u8 = 0x01;

thread_local! {
    static CURRENT: RefCell<TraceContext> = RefCell::new(TraceContext::invalid());
}

/// Returns the calling thread's current trace context
pub fn current() -> TraceContext {
    CURRENT.with(|current| current.borrow().clone())
}

pub(crate) fn set_current(context: TraceContext) -> TraceContext {
    CURRENT.with(|current| current.replace(context))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: [u8; 16],
    span_id: [u8; 8],
    parent_span_id: Option<[u8; 8]>,
    flags: u8,
    valid: bool,
}

impl TraceContext {
    /// The invalid context; `is_valid` returns false
    pub fn invalid() -> Self {
        Self {
            trace_id: [0; 16],
            span_id: [0; 8],
            parent_span_id: None,
            flags: 0,
            valid: false,
        }
    }

    /// Creates a new root context with fresh random identifiers
    pub fn new_root(sampled: bool) -> Self {
        let mut trace_id = [0u8; 16];
        let mut span_id = [0u8; 8];
        rand::Rng::fill(&mut rand::thread_rng(), &mut trace_id[..]);
        rand::Rng::fill(&mut rand::thread_rng(), &mut span_id[..]);
        // all-zero identifiers are reserved as invalid
        trace_id[15] |= 1;
        span_id[7] |= 1;

        Self {
            trace_id,
            span_id,
            parent_span_id: None,
            flags: if sampled { SAMPLED_FLAG } else { 0 },
            valid: true,
        }
    }

    pub(crate) fn with_sampled(mut self, sampled: bool) -> Self {
        if sampled {
            self.flags |= SAMPLED_FLAG;
        } else {
            self.flags &= !SAMPLED_FLAG;
        }
        self
    }

    /// Derives a child context: same trace id, fresh span id, this span as
    /// parent
    pub fn create_child(&self) -> Self {
        let mut span_id = [0u8; 8];
        rand::Rng::fill(&mut rand::thread_rng(), &mut span_id[..]);
        span_id[7] |= 1;

        Self {
            trace_id: self.trace_id,
            span_id,
            parent_span_id: Some(self.span_id),
            flags: self.flags,
            valid: self.valid,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_sampled(&self) -> bool {
        self.flags & SAMPLED_FLAG != 0
    }

    pub fn trace_id(&self) -> &[u8; 16] {
        &self.trace_id
    }

    pub fn span_id(&self) -> &[u8; 8] {
        &self.span_id
    }

    pub fn parent_span_id(&self) -> Option<&[u8; 8]> {
        self.parent_span_id.as_ref()
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Serializes as a `traceparent` header value
    pub fn to_traceparent(&self) -> String {
        let mut out = String::with_capacity(55);
        out.push_str("00-");
        push_hex(&mut out, &self.trace_id);
        out.push('-');
        push_hex(&mut out, &self.span_id);
        out.push('-');
        push_hex(&mut out, &[self.flags]);
        out
    }

    /// Parses a `traceparent` header value. Any violation of the version,
    /// the field lengths, or the hex alphabet yields an invalid context
    /// rather than an error.
    pub fn from_traceparent(value: &str) -> Self {
        let mut parts = value.split('-');

        let (Some(version), Some(trace_id), Some(span_id), Some(flags), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Self::invalid();
        };

        if version != "00" {
            return Self::invalid();
        }

        let (Some(trace_id), Some(span_id), Some(flags)) = (
            parse_hex::<16>(trace_id),
            parse_hex::<8>(span_id),
            parse_hex::<1>(flags),
        ) else {
            return Self::invalid();
        };

        // all-zero identifiers are invalid
        if trace_id == [0; 16] || span_id == [0; 8] {
            return Self::invalid();
        }

        Self {
            trace_id,
            span_id,
            parent_span_id: None,
            flags: flags[0],
            valid: true,
        }
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_traceparent())
    }
}

fn push_hex(out: &mut String, bytes: &[u8]) {
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
}

fn parse_hex<const N: usize>(hex: &str) -> Option<[u8; N]> {
    if hex.len() != N * 2 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let mut out = [0u8; N];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let high = (chunk[0] as char).to_digit(16)?;
        let low = (chunk[1] as char).to_digit(16)?;
        out[i] = ((high << 4) | low) as u8;
    }
    Some(out)
}
