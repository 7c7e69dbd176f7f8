// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Protocol-level foundations shared by every tern transport: variable-length
//! integers, QUIC frame and packet codecs, packet-number spaces, connection
//! identifiers, the crypto capability contracts, and time sources.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod connection;
#[cfg(feature = "alloc")]
pub mod crypto;
pub mod endpoint;
pub mod frame;
pub mod packet;
pub mod random;
pub mod space;
pub mod stream;
pub mod time;
pub mod transport;
pub mod varint;
