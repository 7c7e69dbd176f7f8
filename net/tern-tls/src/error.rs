// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Failures from the TLS and DTLS engines
#[derive(Debug)]
pub enum TlsError {
    /// The certificate or key material could not be loaded
    Credentials(String),
    /// The engine could not be configured
    Config(String),
    /// The peer failed the handshake
    HandshakeFailed(String),
    /// The handshake deadline elapsed
    HandshakeTimeout,
    /// The engine is not connected
    NotConnected,
    /// The underlying transport failed
    Io(std::io::Error),
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Credentials(message) => write!(f, "invalid credentials: {message}"),
            Self::Config(message) => write!(f, "invalid tls configuration: {message}"),
            Self::HandshakeFailed(message) => write!(f, "handshake failed: {message}"),
            Self::HandshakeTimeout => write!(f, "handshake deadline elapsed"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Io(error) => write!(f, "io failure: {error}"),
        }
    }
}

impl std::error::Error for TlsError {}

impl From<std::io::Error> for TlsError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<rustls::Error> for TlsError {
    fn from(error: rustls::Error) -> Self {
        Self::Config(error.to_string())
    }
}

impl From<openssl::error::ErrorStack> for TlsError {
    fn from(error: openssl::error::ErrorStack) -> Self {
        Self::Config(error.to_string())
    }
}
