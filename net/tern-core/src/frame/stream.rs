// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use tern_codec::{decoder_parameterized_value, DecoderBuffer, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# STREAM frames implicitly create a stream and carry stream data.  The
//# Type field in the STREAM frame takes the form 0b00001XXX (or the set
//# of values from 0x08 to 0x0f).

pub const TAG_RANGE_START: Tag = 0x08;
pub const TAG_RANGE_END: Tag = 0x0f;

const FIN_BIT: Tag = 0x01;
const LEN_BIT: Tag = 0x02;
const OFF_BIT: Tag = 0x04;

#[derive(Debug, PartialEq, Eq)]
pub struct Stream<'a> {
    /// The stream the data belongs to
    pub stream_id: VarInt,
    /// The byte offset of the data within the stream
    pub offset: VarInt,
    /// The stream payload
    pub data: &'a [u8],
    /// Marks the end of the stream
    pub is_fin: bool,
}

impl Stream<'_> {
    /// Returns the frame's wire tag.
    ///
    /// Frames always encode an explicit length; the offset field is elided
    /// when zero.
    #[inline]
    pub fn tag(&self) -> Tag {
        let mut tag = TAG_RANGE_START | LEN_BIT;
        if self.offset.as_u64() != 0 {
            tag |= OFF_BIT;
        }
        if self.is_fin {
            tag |= FIN_BIT;
        }
        tag
    }
}

decoder_parameterized_value!(
    impl<'a> Stream<'a> {
        fn decode(tag: Tag, buffer: Buffer) -> Result<Self> {
            let (stream_id, buffer) = buffer.decode()?;

            let (offset, buffer) = if tag & OFF_BIT != 0 {
                buffer.decode()?
            } else {
                (VarInt::ZERO, buffer)
            };

            let (data, buffer) = if tag & LEN_BIT != 0 {
                buffer.decode_with_len_prefix::<VarInt, DecoderBuffer>()?
            } else {
                // without a length, the data extends to the end of the packet
                let len = buffer.len();
                buffer.decode_slice(len)?
            };

            let frame = Stream {
                stream_id,
                offset,
                data: data.into_less_safe_slice(),
                is_fin: tag & FIN_BIT != 0,
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for Stream<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.stream_id);
        if self.offset.as_u64() != 0 {
            buffer.encode(&self.offset);
        }
        buffer.encode_with_len_prefix::<VarInt, _>(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use tern_codec::{DecoderBuffer, EncoderBuffer};

    fn round_trip(frame: Stream) {
        let mut data = [0u8; 1500];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut data);
            encoder.encode(&frame);
            encoder.len()
        };

        let (decoded, remaining) = Frame::decode(DecoderBuffer::new(&data[..len])).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, Frame::Stream(frame));
    }

    #[test]
    fn round_trip_test() {
        round_trip(Stream {
            stream_id: VarInt::from_u8(0),
            offset: VarInt::ZERO,
            data: b"request",
            is_fin: false,
        });
        round_trip(Stream {
            stream_id: VarInt::from_u8(4),
            offset: VarInt::from_u32(70_000),
            data: b"",
            is_fin: true,
        });
    }

    #[test]
    fn implicit_length_test() {
        // 0x08: no OFF, no LEN, no FIN; the payload runs to the packet end
        let data = [0x08u8, 0x02, 0xaa, 0xbb, 0xcc];
        let (frame, remaining) = Frame::decode(DecoderBuffer::new(&data)).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(
            frame,
            Frame::Stream(Stream {
                stream_id: VarInt::from_u8(2),
                offset: VarInt::ZERO,
                data: &[0xaa, 0xbb, 0xcc],
                is_fin: false,
            })
        );
    }

    #[test]
    fn fin_bit_test() {
        for (tag, expected) in [(0x0au8, false), (0x0bu8, true)] {
            let data = [tag, 0x00, 0x01, 0xff];
            let (frame, _) = Frame::decode(DecoderBuffer::new(&data)).unwrap();
            match frame {
                Frame::Stream(stream) => assert_eq!(stream.is_fin, expected),
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }
}
