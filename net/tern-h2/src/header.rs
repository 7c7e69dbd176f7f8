// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::error::FrameError;
use tern_codec::{DecoderBuffer, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9113#section-4.1
//# HTTP Frame {
//#   Length (24),
//#   Type (8),
//#   Flags (8),
//#   Reserved (1),
//#   Stream Identifier (31),
//# }

/// The fixed frame header length
pub const FRAME_HEADER_LEN: usize = 9;

/// The largest payload a frame can carry
pub const MAX_FRAME_LEN: u32 = (1 << 24) - 1;

/// The frame types this codec understands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    RstStream = 0x3,
    Settings = 0x4,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
}

impl FrameType {
    pub fn from_wire(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Self::Data),
            0x1 => Ok(Self::Headers),
            0x3 => Ok(Self::RstStream),
            0x4 => Ok(Self::Settings),
            0x6 => Ok(Self::Ping),
            0x7 => Ok(Self::GoAway),
            0x8 => Ok(Self::WindowUpdate),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// A decoded 9-byte frame header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length; at most [`MAX_FRAME_LEN`]
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    /// 31-bit stream identifier; the reserved top bit must be zero
    pub stream_id: u32,
}

impl FrameHeader {
    /// Decodes a header, returning it and the rest of the buffer
    pub fn decode(buffer: DecoderBuffer) -> Result<(Self, DecoderBuffer), FrameError> {
        let (hi, buffer) = buffer.decode::<u8>()?;
        let (lo, buffer) = buffer.decode::<u16>()?;
        let length = (u32::from(hi) << 16) | u32::from(lo);

        let (frame_type, buffer) = buffer.decode::<u8>()?;
        let frame_type = FrameType::from_wire(frame_type)?;
        let (flags, buffer) = buffer.decode::<u8>()?;

        let (stream_id, buffer) = buffer.decode::<u32>()?;
        if stream_id & 0x8000_0000 != 0 {
            return Err(FrameError::ReservedBitSet);
        }

        Ok((
            Self {
                length,
                frame_type,
                flags,
                stream_id,
            },
            buffer,
        ))
    }
}

impl EncoderValue for FrameHeader {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        debug_assert!(self.length <= MAX_FRAME_LEN);
        encoder.encode(&((self.length >> 16) as u8));
        encoder.encode(&(self.length as u16));
        encoder.encode(&(self.frame_type as u8));
        encoder.encode(&self.flags);
        encoder.encode(&(self.stream_id & 0x7fff_ffff));
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        FRAME_HEADER_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_codec::EncoderBuffer;

    #[test]
    fn round_trip_test() {
        let header = FrameHeader {
            length: 0x01_02_03,
            frame_type: FrameType::Ping,
            flags: 0x01,
            stream_id: 0,
        };

        let mut data = [0u8; FRAME_HEADER_LEN];
        let mut encoder = EncoderBuffer::new(&mut data);
        encoder.encode(&header);
        assert_eq!(encoder.len(), FRAME_HEADER_LEN);
        assert_eq!(data, [0x01, 0x02, 0x03, 0x06, 0x01, 0, 0, 0, 0]);

        let (decoded, remaining) = FrameHeader::decode(DecoderBuffer::new(&data)).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, header);
    }

    #[test]
    fn reserved_bit_test() {
        let data = [0, 0, 0, 0x6, 0, 0x80, 0, 0, 1];
        assert_eq!(
            FrameHeader::decode(DecoderBuffer::new(&data)),
            Err(FrameError::ReservedBitSet)
        );
    }

    #[test]
    fn unknown_type_test() {
        let data = [0, 0, 0, 0x9, 0, 0, 0, 0, 0];
        assert_eq!(
            FrameHeader::decode(DecoderBuffer::new(&data)),
            Err(FrameError::UnknownType(0x9))
        );
    }
}
