// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Typed frames and their payload contracts.
//!
//! Decoding validates every rule the wire format imposes; encoding never
//! emits padding (padding is only honored on receipt).

use crate::{
    error::FrameError,
    header::{FrameHeader, FrameType},
};
use tern_codec::{DecoderBuffer, Encoder, EncoderValue};

/// Frame-level flag bits
pub mod flags {
    pub const END_STREAM: u8 = 0x01;
    pub const ACK: u8 = 0x01;
    pub const END_HEADERS: u8 = 0x04;
    pub const PADDED: u8 = 0x08;
}

#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Data(Data<'a>),
    Headers(Headers<'a>),
    RstStream(RstStream),
    Settings(Settings),
    Ping(Ping),
    GoAway(GoAway<'a>),
    WindowUpdate(WindowUpdate),
}

impl<'a> Frame<'a> {
    /// Decodes one frame from the front of `buffer`, returning the frame and
    /// the remainder
    pub fn decode(buffer: &'a [u8]) -> Result<(Frame<'a>, &'a [u8]), FrameError> {
        let (header, rest) = FrameHeader::decode(DecoderBuffer::new(buffer))?;
        let (payload, remaining) = rest
            .decode_slice(header.length as usize)
            .map_err(|_| FrameError::Truncated)?;
        let payload = payload.into_less_safe_slice();

        let frame = match header.frame_type {
            FrameType::Data => Frame::Data(Data::parse(&header, payload)?),
            FrameType::Headers => Frame::Headers(Headers::parse(&header, payload)?),
            FrameType::RstStream => Frame::RstStream(RstStream::parse(&header, payload)?),
            FrameType::Settings => Frame::Settings(Settings::parse(&header, payload)?),
            FrameType::Ping => Frame::Ping(Ping::parse(&header, payload)?),
            FrameType::GoAway => Frame::GoAway(GoAway::parse(&header, payload)?),
            FrameType::WindowUpdate => {
                Frame::WindowUpdate(WindowUpdate::parse(&header, payload)?)
            }
        };

        Ok((frame, remaining.into_less_safe_slice()))
    }
}

impl EncoderValue for Frame<'_> {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        match self {
            Frame::Data(frame) => frame.encode(encoder),
            Frame::Headers(frame) => frame.encode(encoder),
            Frame::RstStream(frame) => frame.encode(encoder),
            Frame::Settings(frame) => frame.encode(encoder),
            Frame::Ping(frame) => frame.encode(encoder),
            Frame::GoAway(frame) => frame.encode(encoder),
            Frame::WindowUpdate(frame) => frame.encode(encoder),
        }
    }
}

/// Strips PADDED framing: the first byte is the pad length and that many
/// trailing bytes are discarded
fn unpad<'a>(flags_value: u8, payload: &'a [u8]) -> Result<&'a [u8], FrameError> {
    if flags_value & flags::PADDED == 0 {
        return Ok(payload);
    }

    let (&pad_len, rest) = payload.split_first().ok_or(FrameError::PaddingTooLarge)?;
    let data_len = rest
        .len()
        .checked_sub(pad_len as usize)
        .ok_or(FrameError::PaddingTooLarge)?;
    Ok(&rest[..data_len])
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.1
//# DATA frames (type=0x00) convey arbitrary, variable-length sequences of
//# octets associated with a stream.
#[derive(Debug, PartialEq, Eq)]
pub struct Data<'a> {
    pub stream_id: u32,
    pub data: &'a [u8],
    pub end_stream: bool,
}

impl<'a> Data<'a> {
    fn parse(header: &FrameHeader, payload: &'a [u8]) -> Result<Self, FrameError> {
        if header.stream_id == 0 {
            return Err(FrameError::StreamIdRequired(FrameType::Data as u8));
        }

        Ok(Self {
            stream_id: header.stream_id,
            data: unpad(header.flags, payload)?,
            end_stream: header.flags & flags::END_STREAM != 0,
        })
    }
}

impl EncoderValue for Data<'_> {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let mut frame_flags = 0;
        if self.end_stream {
            frame_flags |= flags::END_STREAM;
        }
        encoder.encode(&FrameHeader {
            length: self.data.len() as u32,
            frame_type: FrameType::Data,
            flags: frame_flags,
            stream_id: self.stream_id,
        });
        encoder.write_slice(self.data);
    }
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.2
//# The HEADERS frame (type=0x01) is used to open a stream, and
//# additionally carries a field block fragment.
#[derive(Debug, PartialEq, Eq)]
pub struct Headers<'a> {
    pub stream_id: u32,
    /// An opaque field-block fragment; HPACK is a higher-layer concern
    pub fragment: &'a [u8],
    pub end_headers: bool,
    pub end_stream: bool,
}

impl<'a> Headers<'a> {
    fn parse(header: &FrameHeader, payload: &'a [u8]) -> Result<Self, FrameError> {
        if header.stream_id == 0 {
            return Err(FrameError::StreamIdRequired(FrameType::Headers as u8));
        }

        Ok(Self {
            stream_id: header.stream_id,
            fragment: unpad(header.flags, payload)?,
            end_headers: header.flags & flags::END_HEADERS != 0,
            end_stream: header.flags & flags::END_STREAM != 0,
        })
    }
}

impl EncoderValue for Headers<'_> {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let mut frame_flags = 0;
        if self.end_headers {
            frame_flags |= flags::END_HEADERS;
        }
        if self.end_stream {
            frame_flags |= flags::END_STREAM;
        }
        encoder.encode(&FrameHeader {
            length: self.fragment.len() as u32,
            frame_type: FrameType::Headers,
            flags: frame_flags,
            stream_id: self.stream_id,
        });
        encoder.write_slice(self.fragment);
    }
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.4
//# The RST_STREAM frame (type=0x03) allows for immediate termination of a
//# stream.
#[derive(Debug, PartialEq, Eq)]
pub struct RstStream {
    pub stream_id: u32,
    pub error_code: u32,
}

impl RstStream {
    fn parse(header: &FrameHeader, payload: &[u8]) -> Result<Self, FrameError> {
        if header.stream_id == 0 {
            return Err(FrameError::StreamIdRequired(FrameType::RstStream as u8));
        }
        if payload.len() != 4 {
            return Err(FrameError::PayloadLength {
                frame_type: FrameType::RstStream as u8,
                expected: 4,
                actual: payload.len(),
            });
        }

        let (error_code, _) = DecoderBuffer::new(payload).decode::<u32>()?;
        Ok(Self {
            stream_id: header.stream_id,
            error_code,
        })
    }
}

impl EncoderValue for RstStream {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&FrameHeader {
            length: 4,
            frame_type: FrameType::RstStream,
            flags: 0,
            stream_id: self.stream_id,
        });
        encoder.encode(&self.error_code);
    }
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.5
//# The SETTINGS frame (type=0x04) conveys configuration parameters that
//# affect how endpoints communicate.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Settings {
    pub ack: bool,
    pub entries: Vec<(u16, u32)>,
}

impl Settings {
    pub const ACK: Self = Self {
        ack: true,
        entries: Vec::new(),
    };

    fn parse(header: &FrameHeader, payload: &[u8]) -> Result<Self, FrameError> {
        if header.stream_id != 0 {
            return Err(FrameError::StreamIdForbidden(FrameType::Settings as u8));
        }

        let ack = header.flags & flags::ACK != 0;
        if ack && !payload.is_empty() {
            return Err(FrameError::SettingsAckPayload);
        }
        if payload.len() % 6 != 0 {
            return Err(FrameError::SettingsLength);
        }

        let mut entries = Vec::with_capacity(payload.len() / 6);
        let mut buffer = DecoderBuffer::new(payload);
        while !buffer.is_empty() {
            let (identifier, rest) = buffer.decode::<u16>()?;
            let (value, rest) = rest.decode::<u32>()?;
            entries.push((identifier, value));
            buffer = rest;
        }

        Ok(Self { ack, entries })
    }
}

impl EncoderValue for Settings {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        debug_assert!(!self.ack || self.entries.is_empty());
        encoder.encode(&FrameHeader {
            length: (self.entries.len() * 6) as u32,
            frame_type: FrameType::Settings,
            flags: if self.ack { flags::ACK } else { 0 },
            stream_id: 0,
        });
        for (identifier, value) in &self.entries {
            encoder.encode(identifier);
            encoder.encode(value);
        }
    }
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.7
//# The PING frame (type=0x06) is a mechanism for measuring a minimal
//# round-trip time from the sender, as well as determining whether an
//# idle connection is still functional.
#[derive(Debug, PartialEq, Eq)]
pub struct Ping {
    pub ack: bool,
    pub data: [u8; 8],
}

impl Ping {
    fn parse(header: &FrameHeader, payload: &[u8]) -> Result<Self, FrameError> {
        if header.stream_id != 0 {
            return Err(FrameError::StreamIdForbidden(FrameType::Ping as u8));
        }
        if payload.len() != 8 {
            return Err(FrameError::PayloadLength {
                frame_type: FrameType::Ping as u8,
                expected: 8,
                actual: payload.len(),
            });
        }

        let mut data = [0u8; 8];
        data.copy_from_slice(payload);
        Ok(Self {
            ack: header.flags & flags::ACK != 0,
            data,
        })
    }
}

impl EncoderValue for Ping {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&FrameHeader {
            length: 8,
            frame_type: FrameType::Ping,
            flags: if self.ack { flags::ACK } else { 0 },
            stream_id: 0,
        });
        encoder.write_slice(&self.data);
    }
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.8
//# The GOAWAY frame (type=0x07) is used to initiate shutdown of a
//# connection or to signal serious error conditions.
#[derive(Debug, PartialEq, Eq)]
pub struct GoAway<'a> {
    /// The highest stream id the sender may have processed
    pub last_stream_id: u32,
    pub error_code: u32,
    pub debug_data: &'a [u8],
}

impl<'a> GoAway<'a> {
    fn parse(header: &FrameHeader, payload: &'a [u8]) -> Result<Self, FrameError> {
        if header.stream_id != 0 {
            return Err(FrameError::StreamIdForbidden(FrameType::GoAway as u8));
        }
        if payload.len() < 8 {
            return Err(FrameError::GoAwayLength);
        }

        let buffer = DecoderBuffer::new(payload);
        let (last_stream_id, buffer) = buffer.decode::<u32>()?;
        let (error_code, buffer) = buffer.decode::<u32>()?;

        Ok(Self {
            last_stream_id: last_stream_id & 0x7fff_ffff,
            error_code,
            debug_data: buffer.into_less_safe_slice(),
        })
    }
}

impl EncoderValue for GoAway<'_> {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&FrameHeader {
            length: (8 + self.debug_data.len()) as u32,
            frame_type: FrameType::GoAway,
            flags: 0,
            stream_id: 0,
        });
        encoder.encode(&(self.last_stream_id & 0x7fff_ffff));
        encoder.encode(&self.error_code);
        encoder.write_slice(self.debug_data);
    }
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.9
//# The WINDOW_UPDATE frame (type=0x08) is used to implement flow control.
#[derive(Debug, PartialEq, Eq)]
pub struct WindowUpdate {
    /// Zero applies the update to the whole connection
    pub stream_id: u32,
    pub increment: u32,
}

impl WindowUpdate {
    fn parse(header: &FrameHeader, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() != 4 {
            return Err(FrameError::PayloadLength {
                frame_type: FrameType::WindowUpdate as u8,
                expected: 4,
                actual: payload.len(),
            });
        }

        let (increment, _) = DecoderBuffer::new(payload).decode::<u32>()?;
        let increment = increment & 0x7fff_ffff;
        if increment == 0 {
            return Err(FrameError::ZeroWindowIncrement);
        }

        Ok(Self {
            stream_id: header.stream_id,
            increment,
        })
    }
}

impl EncoderValue for WindowUpdate {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&FrameHeader {
            length: 4,
            frame_type: FrameType::WindowUpdate,
            flags: 0,
            stream_id: self.stream_id,
        });
        encoder.encode(&(self.increment & 0x7fff_ffff));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) {
        let encoded = frame.encode_to_vec();
        let (decoded, remaining) = Frame::decode(&encoded).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn round_trip_test() {
        round_trip(Frame::Data(Data {
            stream_id: 1,
            data: b"hello",
            end_stream: true,
        }));
        round_trip(Frame::Headers(Headers {
            stream_id: 3,
            fragment: &[0x82, 0x86],
            end_headers: true,
            end_stream: false,
        }));
        round_trip(Frame::RstStream(RstStream {
            stream_id: 5,
            error_code: 0x8,
        }));
        round_trip(Frame::Settings(Settings {
            ack: false,
            entries: vec![(0x1, 4096), (0x4, 65_535)],
        }));
        round_trip(Frame::Settings(Settings::ACK));
        round_trip(Frame::Ping(Ping {
            ack: false,
            data: *b"12345678",
        }));
        round_trip(Frame::GoAway(GoAway {
            last_stream_id: 7,
            error_code: 0,
            debug_data: b"shutting down",
        }));
        round_trip(Frame::WindowUpdate(WindowUpdate {
            stream_id: 0,
            increment: 1024,
        }));
    }

    fn frame_bytes(
        frame_type: u8,
        frame_flags: u8,
        stream_id: u32,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut bytes = Vec::new();
        let length = payload.len() as u32;
        bytes.push((length >> 16) as u8);
        bytes.extend_from_slice(&(length as u16).to_be_bytes());
        bytes.push(frame_type);
        bytes.push(frame_flags);
        bytes.extend_from_slice(&stream_id.to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn padded_data_test() {
        // pad length 2: payload is "hi", then 2 pad bytes
        let payload = [2u8, b'h', b'i', 0, 0];
        let bytes = frame_bytes(0x0, flags::PADDED, 1, &payload);
        let (frame, _) = Frame::decode(&bytes).unwrap();
        assert_eq!(
            frame,
            Frame::Data(Data {
                stream_id: 1,
                data: b"hi",
                end_stream: false,
            })
        );
    }

    #[test]
    fn padding_exceeding_payload_test() {
        let payload = [200u8, b'h', b'i'];
        let bytes = frame_bytes(0x0, flags::PADDED, 1, &payload);
        assert_eq!(Frame::decode(&bytes), Err(FrameError::PaddingTooLarge));
    }

    #[test]
    fn data_requires_stream_test() {
        let bytes = frame_bytes(0x0, 0, 0, b"x");
        assert_eq!(Frame::decode(&bytes), Err(FrameError::StreamIdRequired(0x0)));
    }

    #[test]
    fn settings_violations_test() {
        // non-empty ack
        let bytes = frame_bytes(0x4, flags::ACK, 0, &[0; 6]);
        assert_eq!(Frame::decode(&bytes), Err(FrameError::SettingsAckPayload));

        // length not a multiple of 6
        let bytes = frame_bytes(0x4, 0, 0, &[0; 5]);
        assert_eq!(Frame::decode(&bytes), Err(FrameError::SettingsLength));

        // settings must use stream 0
        let bytes = frame_bytes(0x4, 0, 1, &[0; 6]);
        assert_eq!(Frame::decode(&bytes), Err(FrameError::StreamIdForbidden(0x4)));
    }

    #[test]
    fn ping_length_test() {
        let bytes = frame_bytes(0x6, 0, 0, &[0; 7]);
        assert_eq!(
            Frame::decode(&bytes),
            Err(FrameError::PayloadLength {
                frame_type: 0x6,
                expected: 8,
                actual: 7,
            })
        );
    }

    #[test]
    fn goaway_top_bit_cleared_test() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0xffff_ffffu32.to_be_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes());
        let bytes = frame_bytes(0x7, 0, 0, &payload);
        let (frame, _) = Frame::decode(&bytes).unwrap();
        match frame {
            Frame::GoAway(goaway) => assert_eq!(goaway.last_stream_id, 0x7fff_ffff),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn window_update_zero_increment_test() {
        let bytes = frame_bytes(0x8, 0, 0, &0u32.to_be_bytes());
        assert_eq!(Frame::decode(&bytes), Err(FrameError::ZeroWindowIncrement));
    }

    #[test]
    fn decode_never_panics_test() {
        bolero::check!().for_each(|bytes: &[u8]| {
            let _ = Frame::decode(bytes);
        });
    }

    #[test]
    fn truncated_frame_test() {
        let bytes = frame_bytes(0x0, 0, 1, b"full payload");
        assert_eq!(
            Frame::decode(&bytes[..bytes.len() - 1]),
            Err(FrameError::Truncated)
        );
    }
}
