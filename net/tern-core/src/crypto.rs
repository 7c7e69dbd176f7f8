// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cryptographic capability contracts.
//!
//! The engine never names concrete primitives; it speaks to a
//! [`PacketProtection`] provider for AEAD seal/open by encryption level and
//! to a [`handshake::Driver`] for the TLS exchange. Production providers
//! live in `tern-crypto` and `tern-tls`; deterministic test providers live
//! in [`testing`].

use crate::space::EncryptionLevel;
use alloc::vec::Vec;
use core::fmt;

pub mod handshake;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Errors surfaced by packet-protection providers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// The ciphertext failed authentication
    DecryptError,
    /// No keys are installed for the level
    KeyUnavailable(EncryptionLevel),
    /// The provider failed internally
    Internal(&'static str),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DecryptError => write!(f, "payload failed authentication"),
            Self::KeyUnavailable(level) => write!(f, "no keys installed for {level} level"),
            Self::Internal(msg) => write!(f, "{msg}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CryptoError {}

/// Packet protection by encryption level.
///
/// Given a level and a direction, the provider produces keying material and
/// an AEAD seal/open pair. Key derivation is the provider's concern; the
/// engine only installs opaque traffic secrets as the handshake emits them.
pub trait PacketProtection: Send {
    /// Protects `payload`, binding `header` as associated data.
    ///
    /// Returns the ciphertext including the authentication tag.
    fn seal(
        &self,
        level: EncryptionLevel,
        packet_number: u64,
        header: &[u8],
        payload: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Opens `ciphertext`, verifying `header` as associated data
    fn open(
        &self,
        level: EncryptionLevel,
        packet_number: u64,
        header: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Returns whether keys are installed for the level
    fn has_level(&self, level: EncryptionLevel) -> bool;

    /// Installs traffic secrets for a level. `read_secret` protects inbound
    /// packets, `write_secret` outbound.
    fn install_secrets(
        &mut self,
        level: EncryptionLevel,
        read_secret: &[u8],
        write_secret: &[u8],
    ) -> Result<(), CryptoError>;

    /// The authentication tag length appended by [`Self::seal`]
    fn tag_len(&self) -> usize;
}
