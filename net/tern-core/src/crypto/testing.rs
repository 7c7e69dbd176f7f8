// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Deterministic crypto providers for tests.
//!
//! The null protection appends a constant tag instead of encrypting; the
//! scripted handshake exchanges fixed flights and derives matching secrets
//! on both sides. Connections built on these providers exercise the full
//! engine without a TLS stack.

use crate::{
    crypto::{
        handshake::{self, Output},
        CryptoError, PacketProtection,
    },
    endpoint,
    space::EncryptionLevel,
};
use alloc::{vec, vec::Vec};

const TAG_LEN: usize = 16;
const TAG: [u8; TAG_LEN] = *b"tern-null-aead-1";

/// Packet protection that authenticates with a constant tag
#[derive(Debug)]
pub struct NullProtection {
    available: [bool; 4],
}

impl Default for NullProtection {
    fn default() -> Self {
        // Initial keys derive from public data; they are always available
        let mut available = [false; 4];
        available[EncryptionLevel::Initial as usize] = true;
        Self { available }
    }
}

impl PacketProtection for NullProtection {
    fn seal(
        &self,
        level: EncryptionLevel,
        _packet_number: u64,
        _header: &[u8],
        payload: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if !self.has_level(level) {
            return Err(CryptoError::KeyUnavailable(level));
        }
        let mut out = Vec::with_capacity(payload.len() + TAG_LEN);
        out.extend_from_slice(payload);
        out.extend_from_slice(&TAG);
        Ok(out)
    }

    fn open(
        &self,
        level: EncryptionLevel,
        _packet_number: u64,
        _header: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if !self.has_level(level) {
            return Err(CryptoError::KeyUnavailable(level));
        }
        let payload_len = ciphertext
            .len()
            .checked_sub(TAG_LEN)
            .ok_or(CryptoError::DecryptError)?;
        if ciphertext[payload_len..] != TAG {
            return Err(CryptoError::DecryptError);
        }
        Ok(ciphertext[..payload_len].to_vec())
    }

    fn has_level(&self, level: EncryptionLevel) -> bool {
        self.available[level as usize]
    }

    fn install_secrets(
        &mut self,
        level: EncryptionLevel,
        _read_secret: &[u8],
        _write_secret: &[u8],
    ) -> Result<(), CryptoError> {
        self.available[level as usize] = true;
        Ok(())
    }

    fn tag_len(&self) -> usize {
        TAG_LEN
    }
}

fn secret(level: EncryptionLevel, writer: endpoint::Type) -> Vec<u8> {
    let mut secret = vec![0u8; 32];
    for (i, byte) in secret.iter_mut().enumerate() {
        *byte = (level as u8).wrapping_mul(31) ^ (i as u8);
    }
    // distinguish directions with the top bit
    if writer.is_server() {
        secret[0] |= 0x80;
    }
    secret
}

fn secrets_for(level: EncryptionLevel, local: endpoint::Type) -> Output {
    Output::Secrets {
        level,
        read_secret: secret(level, local.peer_type()),
        write_secret: secret(level, local),
    }
}

const CLIENT_HELLO: &[u8] = b"tern test client hello";
const SERVER_HELLO: &[u8] = b"tern test server hello";
const SERVER_FINISHED: &[u8] = b"tern test server finished";
const CLIENT_FINISHED: &[u8] = b"tern test client finished";

/// A scripted two-round-trip handshake with deterministic secrets
#[derive(Debug)]
pub struct ScriptedHandshake {
    endpoint: endpoint::Type,
    complete: bool,
}

impl ScriptedHandshake {
    pub fn new(endpoint: endpoint::Type) -> Self {
        Self {
            endpoint,
            complete: false,
        }
    }
}

impl handshake::Driver for ScriptedHandshake {
    fn start(&mut self) -> Result<Vec<Output>, handshake::Error> {
        match self.endpoint {
            endpoint::Type::Client => Ok(vec![Output::Crypto {
                level: EncryptionLevel::Initial,
                data: CLIENT_HELLO.to_vec(),
            }]),
            endpoint::Type::Server => Ok(Vec::new()),
        }
    }

    fn on_crypto(
        &mut self,
        level: EncryptionLevel,
        data: &[u8],
    ) -> Result<Vec<Output>, handshake::Error> {
        match (self.endpoint, level, data) {
            (endpoint::Type::Server, EncryptionLevel::Initial, CLIENT_HELLO) => Ok(vec![
                Output::Crypto {
                    level: EncryptionLevel::Initial,
                    data: SERVER_HELLO.to_vec(),
                },
                secrets_for(EncryptionLevel::Handshake, self.endpoint),
                Output::Crypto {
                    level: EncryptionLevel::Handshake,
                    data: SERVER_FINISHED.to_vec(),
                },
                secrets_for(EncryptionLevel::Application, self.endpoint),
            ]),
            (endpoint::Type::Client, EncryptionLevel::Initial, SERVER_HELLO) => {
                Ok(vec![secrets_for(EncryptionLevel::Handshake, self.endpoint)])
            }
            (endpoint::Type::Client, EncryptionLevel::Handshake, SERVER_FINISHED) => {
                self.complete = true;
                Ok(vec![
                    secrets_for(EncryptionLevel::Application, self.endpoint),
                    Output::Crypto {
                        level: EncryptionLevel::Handshake,
                        data: CLIENT_FINISHED.to_vec(),
                    },
                    Output::Complete,
                ])
            }
            (endpoint::Type::Server, EncryptionLevel::Handshake, CLIENT_FINISHED) => {
                self.complete = true;
                Ok(vec![Output::Complete])
            }
            _ => Err(handshake::Error::Protocol(
                crate::transport::Error::PROTOCOL_VIOLATION
                    .with_reason("unexpected handshake message"),
            )),
        }
    }

    fn is_complete(&self) -> bool {
        self.complete
    }
}
