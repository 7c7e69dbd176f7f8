// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The opaque handshake capability.
//!
//! CRYPTO frame payloads are fed to a [`Driver`]; the driver emits further
//! CRYPTO data to transmit, traffic secrets to install, and a completion
//! signal. The TLS implementation behind the driver is invisible to the
//! engine.

use crate::{space::EncryptionLevel, transport};
use alloc::vec::Vec;
use core::fmt;

/// An action the engine must take on behalf of the handshake
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output {
    /// Queue CRYPTO data for transmission at the given level
    Crypto {
        level: EncryptionLevel,
        data: Vec<u8>,
    },
    /// Install traffic secrets for the given level
    Secrets {
        level: EncryptionLevel,
        read_secret: Vec<u8>,
        write_secret: Vec<u8>,
    },
    /// The handshake is complete
    Complete,
}

/// A fatal handshake failure
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The peer's messages violated the handshake protocol
    Protocol(transport::Error),
    /// The peer could not be authenticated
    Rejected(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Protocol(error) => write!(f, "handshake protocol error: {error}"),
            Self::Rejected(reason) => write!(f, "handshake rejected: {reason}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Drives a handshake from CRYPTO frame payloads
pub trait Driver: Send {
    /// Produces the first flight (client role); servers return nothing
    fn start(&mut self) -> Result<Vec<Output>, Error>;

    /// Feeds received CRYPTO data at `level` and returns resulting actions
    fn on_crypto(&mut self, level: EncryptionLevel, data: &[u8]) -> Result<Vec<Output>, Error>;

    /// Returns whether the handshake has completed
    fn is_complete(&self) -> bool;

    /// Returns whether the peer accepted 0-RTT data.
    ///
    /// Surfaced for hosts; the engine itself never transmits application
    /// data at the EarlyData level.
    fn is_early_data_accepted(&self) -> bool {
        false
    }

    /// The application protocol negotiated via ALPN, if any
    fn negotiated_alpn(&self) -> Option<&[u8]> {
        None
    }
}
