// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use tern_codec::{decoder_parameterized_value, DecoderBuffer, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
//# A CRYPTO frame (type=0x06) is used to transmit cryptographic
//# handshake messages.

pub const TAG: Tag = 0x06;

#[derive(Debug, PartialEq, Eq)]
pub struct Crypto<'a> {
    /// The byte offset in the handshake stream for this data
    pub offset: VarInt,
    /// The cryptographic message data
    pub data: &'a [u8],
}

impl Crypto<'_> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> Crypto<'a> {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (offset, buffer) = buffer.decode()?;
            let (data, buffer) = buffer.decode_with_len_prefix::<VarInt, DecoderBuffer>()?;

            let frame = Crypto {
                offset,
                data: data.into_less_safe_slice(),
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for Crypto<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&TAG);
        buffer.encode(&self.offset);
        buffer.encode_with_len_prefix::<VarInt, _>(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use tern_codec::{DecoderBuffer, EncoderBuffer};

    #[test]
    fn round_trip_test() {
        let frame = Crypto {
            offset: VarInt::from_u16(300),
            data: b"client hello bytes",
        };

        let mut data = [0u8; 64];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut data);
            encoder.encode(&frame);
            encoder.len()
        };

        let (decoded, remaining) = Frame::decode(DecoderBuffer::new(&data[..len])).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, Frame::Crypto(frame));
    }

    #[test]
    fn truncated_data_test() {
        // length prefix claims more data than the buffer holds
        let data = [TAG, 0x00, 0x0a, 1, 2, 3];
        assert!(Frame::decode(DecoderBuffer::new(&data)).is_err());
    }
}
