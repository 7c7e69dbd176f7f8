// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Failure containment: the circuit breaker and the retrying client
//! wrapper

pub mod breaker;
pub mod client;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use client::{ResilientClient, RetryConfig, Transport};
