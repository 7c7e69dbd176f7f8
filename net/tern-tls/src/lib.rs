// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! TLS capability providers for tern's stream and datagram transports.
//!
//! The stream engine pins TLS 1.3 through rustls; the datagram engine
//! drives OpenSSL DTLS through in-memory BIOs so the caller owns the UDP
//! socket.

pub mod dtls;
pub mod error;
pub mod stream;

pub use dtls::{DtlsEngine, DtlsServerSessions};
pub use error::TlsError;
pub use stream::{TlsClient, TlsClientOptions, TlsServer};
