// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios over real sockets

mod backpressure;
mod quic_round_trip;
mod setup;
mod tls_echo;
