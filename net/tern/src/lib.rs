// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A multi-protocol asynchronous messaging transport.
//!
//! `tern` provides unified client/server abstractions over TCP,
//! TCP-with-TLS, UDP-with-DTLS, and QUIC, with consistent lifecycle,
//! callback, and backpressure semantics:
//!
//! - [`runtime::ReactorManager`] owns the shared worker pool every driver
//!   loop runs on.
//! - [`server::MessagingServer`] / [`client::MessagingClient`] exchange
//!   length-prefixed payloads over plain or TLS 1.3 streams through
//!   [`session::Session`]s with bounded-inbox backpressure.
//! - [`dgram`] and [`quic`] carry the same model over secure datagrams.
//! - [`pool::ConnectionPool`], [`resilience::CircuitBreaker`], and
//!   [`resilience::ResilientClient`] harden the client side.
//! - Observability lives in the `tern-telemetry` crate and is emitted
//!   throughout.

pub mod callbacks;
pub mod client;
pub mod config;
pub mod dgram;
pub mod error;
pub mod pool;
pub mod quic;
pub mod resilience;
pub mod runtime;
pub mod server;
pub mod session;

pub use callbacks::Callbacks;
pub use client::MessagingClient;
pub use config::{ClientConfig, PoolConfig, ServerConfig, SessionLimits};
pub use error::{Error, ErrorKind};
pub use pool::ConnectionPool;
pub use resilience::{BreakerConfig, CircuitBreaker, ResilientClient, RetryConfig};
pub use runtime::ReactorManager;
pub use server::MessagingServer;

#[cfg(test)]
mod tests;
