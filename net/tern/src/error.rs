// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The structured error surfaced by every public operation.
//!
//! Errors carry a kind, a message, and the operation that produced them;
//! log output and error callbacks receive all three.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, displaydoc::Display)]
#[non_exhaustive]
pub enum ErrorKind {
    /// the component is already running
    AlreadyRunning,
    /// the component is not running
    NotRunning,
    /// an argument was rejected
    InvalidArgument,
    /// the connection is closed
    ConnectionClosed,
    /// the connection attempt timed out
    ConnectionTimeout,
    /// the listen address is already in use
    BindAddressInUse,
    /// binding the listen address was not permitted
    BindPermissionDenied,
    /// the payload could not be sent
    SendFailed,
    /// the security handshake failed
    HandshakeFailed,
    /// the circuit breaker is open
    CircuitOpen,
    /// an internal error occurred
    InternalError,
}

#[derive(Clone, Debug)]
pub struct Error {
    pub kind: ErrorKind,
    /// The operation that produced the error, e.g. `"server.start"`
    pub operation: &'static str,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Maps an IO error from a bind call, distinguishing address-in-use
    /// from permission-denied
    pub fn from_bind(operation: &'static str, error: std::io::Error) -> Self {
        let kind = match error.kind() {
            std::io::ErrorKind::AddrInUse => ErrorKind::BindAddressInUse,
            std::io::ErrorKind::PermissionDenied => ErrorKind::BindPermissionDenied,
            _ => ErrorKind::InvalidArgument,
        };
        Self::new(kind, operation, error.to_string())
    }

    pub fn from_io(operation: &'static str, error: std::io::Error) -> Self {
        let kind = match error.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::ConnectionTimeout,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::NotConnected => ErrorKind::ConnectionClosed,
            _ => ErrorKind::InternalError,
        };
        Self::new(kind, operation, error.to_string())
    }

    pub fn closed(operation: &'static str) -> Self {
        Self::new(ErrorKind::ConnectionClosed, operation, "connection closed")
    }

    pub fn not_running(operation: &'static str) -> Self {
        Self::new(ErrorKind::NotRunning, operation, "not running")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.kind)?;
        if !self.message.is_empty() {
            write!(f, " ({})", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<tern_tls::TlsError> for Error {
    fn from(error: tern_tls::TlsError) -> Self {
        use tern_tls::TlsError;
        match error {
            TlsError::Credentials(message) | TlsError::Config(message) => {
                Self::new(ErrorKind::InvalidArgument, "tls.configure", message)
            }
            TlsError::HandshakeFailed(message) => {
                Self::new(ErrorKind::HandshakeFailed, "tls.handshake", message)
            }
            TlsError::HandshakeTimeout => Self::new(
                ErrorKind::HandshakeFailed,
                "tls.handshake",
                "handshake deadline elapsed",
            ),
            TlsError::NotConnected => Self::closed("tls.send"),
            TlsError::Io(error) => Self::from_io("tls.io", error),
        }
    }
}
