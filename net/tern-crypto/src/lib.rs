// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The default [`PacketProtection`] provider, backed by *ring*.
//!
//! Initial keys derive from the client's destination connection ID with the
//! version 1 salt; later levels install the opaque traffic secrets the
//! handshake driver emits. All levels protect with AES-128-GCM and a
//! pn-XOR-IV nonce.

pub mod label;

use label::hkdf_expand_label;
use ring::{aead, hkdf};
use tern_core::{
    connection,
    crypto::{CryptoError, PacketProtection},
    endpoint,
    space::EncryptionLevel,
};

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# initial_salt = 0x38762cf7f55934b34d179ae6a4c80cadccbb7f0a
const INITIAL_SALT: [u8; 20] = [
    0x38, 0x76, 0x2c, 0xf7, 0xf5, 0x59, 0x34, 0xb3, 0x4d, 0x17, 0x9a, 0xe6, 0xa4, 0xc8, 0x0c,
    0xad, 0xcc, 0xbb, 0x7f, 0x0a,
];

const KEY_LEN: usize = 16;
const IV_LEN: usize = 12;
const SECRET_LEN: usize = 32;

struct DirectionKey {
    key: aead::LessSafeKey,
    iv: [u8; IV_LEN],
}

impl DirectionKey {
    fn from_secret(secret: &[u8]) -> Result<Self, CryptoError> {
        let prk = hkdf::Prk::new_less_safe(hkdf::HKDF_SHA256, secret);

        let mut key = [0u8; KEY_LEN];
        hkdf_expand_label(&prk, b"quic key", &mut key)?;

        let mut iv = [0u8; IV_LEN];
        hkdf_expand_label(&prk, b"quic iv", &mut iv)?;

        let key = aead::UnboundKey::new(&aead::AES_128_GCM, &key)
            .map_err(|_| CryptoError::Internal("aead key construction failed"))?;

        Ok(Self {
            key: aead::LessSafeKey::new(key),
            iv,
        })
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.3
    //# The nonce, N, is formed by combining the packet protection IV with
    //# the packet number.
    fn nonce(&self, packet_number: u64) -> aead::Nonce {
        let mut nonce = self.iv;
        for (nonce, pn) in nonce[IV_LEN - 8..]
            .iter_mut()
            .zip(packet_number.to_be_bytes())
        {
            *nonce ^= pn;
        }
        aead::Nonce::assume_unique_for_key(nonce)
    }
}

struct LevelKeys {
    sealer: DirectionKey,
    opener: DirectionKey,
}

/// Packet protection with per-level AES-128-GCM keys
pub struct RingProtection {
    levels: [Option<LevelKeys>; 4],
}

impl RingProtection {
    /// Creates the provider for `local` with initial keys derived from the
    /// client's destination connection ID
    pub fn new(
        local: endpoint::Type,
        client_destination_cid: &connection::Id,
    ) -> Result<Self, CryptoError> {
        //= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
        //# initial_secret = HKDF-Extract(initial_salt, client_dst_connection_id)
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &INITIAL_SALT);
        let initial = salt.extract(client_destination_cid.as_slice());

        let mut client_secret = [0u8; SECRET_LEN];
        label::hkdf_expand_label(&initial, b"client in", &mut client_secret)?;

        let mut server_secret = [0u8; SECRET_LEN];
        label::hkdf_expand_label(&initial, b"server in", &mut server_secret)?;

        let (write_secret, read_secret) = match local {
            endpoint::Type::Client => (client_secret, server_secret),
            endpoint::Type::Server => (server_secret, client_secret),
        };

        let mut levels: [Option<LevelKeys>; 4] = Default::default();
        levels[EncryptionLevel::Initial as usize] = Some(LevelKeys {
            sealer: DirectionKey::from_secret(&write_secret)?,
            opener: DirectionKey::from_secret(&read_secret)?,
        });

        Ok(Self { levels })
    }

    fn level_keys(&self, level: EncryptionLevel) -> Result<&LevelKeys, CryptoError> {
        self.levels[level as usize]
            .as_ref()
            .ok_or(CryptoError::KeyUnavailable(level))
    }
}

impl PacketProtection for RingProtection {
    fn seal(
        &self,
        level: EncryptionLevel,
        packet_number: u64,
        header: &[u8],
        payload: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let keys = self.level_keys(level)?;
        let mut in_out = payload.to_vec();

        keys.sealer
            .key
            .seal_in_place_append_tag(
                keys.sealer.nonce(packet_number),
                aead::Aad::from(header),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Internal("seal failed"))?;

        Ok(in_out)
    }

    fn open(
        &self,
        level: EncryptionLevel,
        packet_number: u64,
        header: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let keys = self.level_keys(level)?;
        let mut in_out = ciphertext.to_vec();

        let plaintext = keys
            .opener
            .key
            .open_in_place(
                keys.opener.nonce(packet_number),
                aead::Aad::from(header),
                &mut in_out,
            )
            .map_err(|_| CryptoError::DecryptError)?;

        let len = plaintext.len();
        in_out.truncate(len);
        Ok(in_out)
    }

    fn has_level(&self, level: EncryptionLevel) -> bool {
        self.levels[level as usize].is_some()
    }

    fn install_secrets(
        &mut self,
        level: EncryptionLevel,
        read_secret: &[u8],
        write_secret: &[u8],
    ) -> Result<(), CryptoError> {
        self.levels[level as usize] = Some(LevelKeys {
            sealer: DirectionKey::from_secret(write_secret)?,
            opener: DirectionKey::from_secret(read_secret)?,
        });
        Ok(())
    }

    fn tag_len(&self) -> usize {
        aead::AES_128_GCM.tag_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn client_server() -> (RingProtection, RingProtection) {
        //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
        //# These packets use an 8-byte client-chosen Destination Connection ID
        //# of 0x8394c8f03e515708.
        let cid = connection::Id::try_from(&hex!("8394c8f03e515708")[..]).unwrap();
        let client = RingProtection::new(endpoint::Type::Client, &cid).unwrap();
        let server = RingProtection::new(endpoint::Type::Server, &cid).unwrap();
        (client, server)
    }

    #[test]
    fn initial_round_trip_test() {
        let (client, server) = client_server();

        let header = b"example header";
        let payload = b"example payload";

        let sealed = client
            .seal(EncryptionLevel::Initial, 2, header, payload)
            .unwrap();
        assert_eq!(sealed.len(), payload.len() + client.tag_len());

        let opened = server
            .open(EncryptionLevel::Initial, 2, header, &sealed)
            .unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn tampered_header_fails_test() {
        let (client, server) = client_server();

        let sealed = client
            .seal(EncryptionLevel::Initial, 0, b"aad", b"payload")
            .unwrap();

        assert_eq!(
            server.open(EncryptionLevel::Initial, 0, b"bad", &sealed),
            Err(CryptoError::DecryptError)
        );
        // the nonce binds the packet number as well
        assert_eq!(
            server.open(EncryptionLevel::Initial, 1, b"aad", &sealed),
            Err(CryptoError::DecryptError)
        );
    }

    #[test]
    fn handshake_keys_install_test() {
        let (mut client, mut server) = client_server();
        let level = EncryptionLevel::Handshake;
        assert!(!client.has_level(level));

        let secret_a = [0x11u8; 32];
        let secret_b = [0x22u8; 32];
        client.install_secrets(level, &secret_b, &secret_a).unwrap();
        server.install_secrets(level, &secret_a, &secret_b).unwrap();

        let sealed = client.seal(level, 7, b"h", b"finished").unwrap();
        assert_eq!(server.open(level, 7, b"h", &sealed).unwrap(), b"finished");
    }
}
