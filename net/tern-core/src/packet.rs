// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! QUIC packet header codec.
//!
//! Long headers carry the Initial, EarlyData, and Handshake levels and an
//! explicit length so packets can be coalesced into one datagram; the short
//! header carries the Application level and extends to the end of the
//! datagram.

use crate::{
    connection,
    space::EncryptionLevel,
    varint::VarInt,
};
use tern_codec::{DecoderBuffer, DecoderError, Encoder, EncoderValue};

pub mod number;

/// The QUIC version this crate speaks
pub const VERSION: u32 = 0x0000_0001;

const FORM_BIT: u8 = 0x80;
const FIXED_BIT: u8 = 0x40;

const INITIAL_TYPE: u8 = 0b00;
const EARLY_DATA_TYPE: u8 = 0b01;
const HANDSHAKE_TYPE: u8 = 0b10;

/// Everything needed to write a protected packet's header
#[derive(Debug)]
pub struct HeaderParams<'a> {
    pub level: EncryptionLevel,
    pub destination_cid: &'a connection::Id,
    pub source_cid: &'a connection::Id,
    /// Initial packets only; empty otherwise
    pub token: &'a [u8],
    pub packet_number: u64,
    pub largest_acked: Option<u64>,
    /// The ciphertext length, tag included
    pub payload_len: usize,
}

/// Encodes a packet header, returning the truncated packet-number length
pub fn encode_header<E: Encoder>(params: &HeaderParams, encoder: &mut E) -> usize {
    let (truncated, pn_len) = number::truncate(params.packet_number, params.largest_acked);
    let pn_bits = (pn_len - 1) as u8;

    match params.level {
        EncryptionLevel::Application => {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-17.3
            //# 1-RTT Packet {
            //#   Header Form (1) = 0,
            //#   Fixed Bit (1) = 1,
            encoder.encode(&(FIXED_BIT | pn_bits));
            encoder.encode(params.destination_cid);
        }
        level => {
            let long_type = match level {
                EncryptionLevel::Initial => INITIAL_TYPE,
                EncryptionLevel::EarlyData => EARLY_DATA_TYPE,
                _ => HANDSHAKE_TYPE,
            };
            encoder.encode(&(FORM_BIT | FIXED_BIT | (long_type << 4) | pn_bits));
            encoder.encode(&VERSION);
            encoder.encode(&(params.destination_cid.len() as u8));
            encoder.encode(params.destination_cid);
            encoder.encode(&(params.source_cid.len() as u8));
            encoder.encode(params.source_cid);

            if level.is_initial() {
                encoder.encode_with_len_prefix::<VarInt, _>(&params.token);
            }

            let length = VarInt::new((pn_len + params.payload_len) as u64)
                .expect("packet length exceeds varint range");
            encoder.encode(&length);
        }
    }

    encoder.write_sized(pn_len, |buffer| {
        buffer.copy_from_slice(&truncated.to_be_bytes()[8 - pn_len..]);
    });

    pn_len
}

/// A parsed, still-protected packet
#[derive(Debug, PartialEq, Eq)]
pub struct Parsed<'a> {
    pub level: EncryptionLevel,
    pub destination_cid: connection::Id,
    /// Empty for short-header packets
    pub source_cid: connection::Id,
    /// Initial packets only
    pub token: &'a [u8],
    pub truncated_packet_number: u64,
    pub packet_number_len: usize,
    /// The header bytes, through the packet number; AEAD associated data
    pub header: &'a [u8],
    /// The protected payload
    pub payload: &'a [u8],
}

impl Parsed<'_> {
    /// Expands the truncated packet number against the largest number
    /// received in this packet's space
    #[inline]
    pub fn packet_number(&self, largest_received: Option<u64>) -> u64 {
        number::expand(
            self.truncated_packet_number,
            self.packet_number_len,
            largest_received,
        )
    }
}

/// Decodes one packet from the front of a datagram.
///
/// `local_cid_len` is the length of connection IDs this endpoint issues; the
/// short header does not carry one on the wire. Returns the parsed packet
/// and the remainder of the datagram (further coalesced packets).
pub fn decode(
    datagram: &[u8],
    local_cid_len: usize,
) -> Result<(Parsed<'_>, &[u8]), DecoderError> {
    let buffer = DecoderBuffer::new(datagram);
    let first = buffer.peek_byte(0)?;

    if first & FIXED_BIT == 0 {
        return Err(DecoderError::InvariantViolation("fixed bit not set"));
    }

    if first & FORM_BIT == 0 {
        return decode_short(datagram, first, local_cid_len);
    }

    decode_long(datagram, first)
}

fn decode_short(
    datagram: &[u8],
    first: u8,
    local_cid_len: usize,
) -> Result<(Parsed<'_>, &[u8]), DecoderError> {
    let pn_len = (first & 0b11) as usize + 1;
    let buffer = DecoderBuffer::new(datagram).skip(1)?;

    let (cid, buffer) = buffer.decode_slice(local_cid_len)?;
    let destination_cid = connection::Id::try_from(cid.into_less_safe_slice())
        .map_err(|_| DecoderError::InvariantViolation("connection id too long"))?;

    let (pn_bytes, payload) = buffer.decode_slice(pn_len)?;
    let truncated = be_value(pn_bytes.into_less_safe_slice());

    let header_len = 1 + local_cid_len + pn_len;
    let parsed = Parsed {
        level: EncryptionLevel::Application,
        destination_cid,
        source_cid: connection::Id::EMPTY,
        token: &[],
        truncated_packet_number: truncated,
        packet_number_len: pn_len,
        header: &datagram[..header_len],
        payload: payload.into_less_safe_slice(),
    };

    // a short-header packet consumes the rest of the datagram
    Ok((parsed, &[]))
}

fn decode_long(datagram: &[u8], first: u8) -> Result<(Parsed<'_>, &[u8]), DecoderError> {
    let pn_len = (first & 0b11) as usize + 1;
    let level = match (first >> 4) & 0b11 {
        INITIAL_TYPE => EncryptionLevel::Initial,
        EARLY_DATA_TYPE => EncryptionLevel::EarlyData,
        HANDSHAKE_TYPE => EncryptionLevel::Handshake,
        _ => return Err(DecoderError::InvariantViolation("retry packets not supported")),
    };

    let buffer = DecoderBuffer::new(datagram).skip(1)?;

    let (version, buffer) = buffer.decode::<u32>()?;
    if version != VERSION {
        return Err(DecoderError::InvariantViolation("unsupported version"));
    }

    let (dcid, buffer) = buffer.decode_slice_with_len_prefix::<u8>()?;
    let destination_cid = connection::Id::try_from(dcid.into_less_safe_slice())
        .map_err(|_| DecoderError::InvariantViolation("connection id too long"))?;

    let (scid, buffer) = buffer.decode_slice_with_len_prefix::<u8>()?;
    let source_cid = connection::Id::try_from(scid.into_less_safe_slice())
        .map_err(|_| DecoderError::InvariantViolation("connection id too long"))?;

    let (token, buffer) = if level.is_initial() {
        let (token, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
        (token.into_less_safe_slice(), buffer)
    } else {
        (&[][..], buffer)
    };

    let (length, buffer) = buffer.decode::<VarInt>()?;
    let length: usize = length
        .try_into()
        .map_err(|_| DecoderError::LengthCapacityExceeded)?;

    if length < pn_len {
        return Err(DecoderError::InvariantViolation("packet length too short"));
    }

    let (body, remaining) = buffer.decode_slice(length)?;
    let (pn_bytes, payload) = body.decode_slice(pn_len)?;
    let truncated = be_value(pn_bytes.into_less_safe_slice());

    let header_len = datagram.len() - remaining.len() - length + pn_len;
    let parsed = Parsed {
        level,
        destination_cid,
        source_cid,
        token,
        truncated_packet_number: truncated,
        packet_number_len: pn_len,
        header: &datagram[..header_len],
        payload: payload.into_less_safe_slice(),
    };

    Ok((parsed, remaining.into_less_safe_slice()))
}

fn be_value(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for byte in bytes {
        value = (value << 8) | u64::from(*byte);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_codec::EncoderBuffer;

    fn cid(bytes: &[u8]) -> connection::Id {
        connection::Id::try_from(bytes).unwrap()
    }

    fn encode(params: &HeaderParams, payload: &[u8]) -> alloc::vec::Vec<u8> {
        let mut data = alloc::vec![0u8; 1500];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut data);
            encode_header(params, &mut encoder);
            encoder.write_slice(payload);
            encoder.len()
        };
        data.truncate(len);
        data
    }

    #[test]
    fn initial_round_trip_test() {
        let dcid = cid(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let scid = cid(&[9, 10, 11, 12]);
        let payload = [0xaau8; 32];

        let datagram = encode(
            &HeaderParams {
                level: EncryptionLevel::Initial,
                destination_cid: &dcid,
                source_cid: &scid,
                token: b"tok",
                packet_number: 0,
                largest_acked: None,
                payload_len: payload.len(),
            },
            &payload,
        );

        let (parsed, remaining) = decode(&datagram, 8).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(parsed.level, EncryptionLevel::Initial);
        assert_eq!(parsed.destination_cid, dcid);
        assert_eq!(parsed.source_cid, scid);
        assert_eq!(parsed.token, b"tok");
        assert_eq!(parsed.packet_number(None), 0);
        assert_eq!(parsed.payload, &payload[..]);
        // associated data covers the full header, packet number included
        assert_eq!(&datagram[..parsed.header.len()], parsed.header);
    }

    #[test]
    fn short_round_trip_test() {
        let dcid = cid(&[7; 8]);
        let payload = [0x55u8; 16];

        let datagram = encode(
            &HeaderParams {
                level: EncryptionLevel::Application,
                destination_cid: &dcid,
                source_cid: &connection::Id::EMPTY,
                token: &[],
                packet_number: 1234,
                largest_acked: Some(1200),
                payload_len: payload.len(),
            },
            &payload,
        );

        let (parsed, remaining) = decode(&datagram, 8).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(parsed.level, EncryptionLevel::Application);
        assert_eq!(parsed.destination_cid, dcid);
        assert_eq!(parsed.packet_number(Some(1200)), 1234);
        assert_eq!(parsed.payload, &payload[..]);
    }

    #[test]
    fn coalesced_packets_test() {
        let dcid = cid(&[1; 8]);
        let scid = cid(&[2; 8]);

        let mut first = encode(
            &HeaderParams {
                level: EncryptionLevel::Initial,
                destination_cid: &dcid,
                source_cid: &scid,
                token: &[],
                packet_number: 0,
                largest_acked: None,
                payload_len: 4,
            },
            &[1, 2, 3, 4],
        );
        let second = encode(
            &HeaderParams {
                level: EncryptionLevel::Handshake,
                destination_cid: &dcid,
                source_cid: &scid,
                token: &[],
                packet_number: 0,
                largest_acked: None,
                payload_len: 4,
            },
            &[5, 6, 7, 8],
        );
        first.extend_from_slice(&second);

        let (parsed, remaining) = decode(&first, 8).unwrap();
        assert_eq!(parsed.level, EncryptionLevel::Initial);
        assert_eq!(parsed.payload, &[1, 2, 3, 4]);

        let (parsed, remaining) = decode(remaining, 8).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(parsed.level, EncryptionLevel::Handshake);
        assert_eq!(parsed.payload, &[5, 6, 7, 8]);
    }

    #[test]
    fn rejects_missing_fixed_bit_test() {
        let datagram = [0x00u8; 16];
        assert!(decode(&datagram, 8).is_err());
    }

    #[test]
    fn decode_never_panics_test() {
        bolero::check!().for_each(|bytes: &[u8]| {
            let _ = decode(bytes, 8);
        });
    }
}
