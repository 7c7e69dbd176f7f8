// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The QUIC connection engine.
//!
//! [`Connection`] is a sans-IO state machine: the host feeds it received
//! datagrams and timer expirations, and drains outgoing datagrams and
//! application events. Socket handling, clocks, and task scheduling live in
//! the `tern` crate.

pub mod config;
pub mod connection;
pub mod pending;
pub mod recovery;
pub mod streams;

pub use config::ConnectionConfig;
pub use connection::{Connection, Event, State};
