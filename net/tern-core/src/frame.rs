// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! QUIC frame codecs.
//!
//! Each frame type lives in its own module with its wire tag, struct, and
//! codec implementations; [`Frame`] dispatches decoding off the tag byte.

use tern_codec::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue};

pub mod ack;
pub mod connection_close;
pub mod crypto;
pub mod handshake_done;
pub mod max_data;
pub mod max_stream_data;
pub mod padding;
pub mod ping;
pub mod reset_stream;
pub mod stream;

pub use ack::Ack;
pub use connection_close::ConnectionClose;
pub use crypto::Crypto;
pub use handshake_done::HandshakeDone;
pub use max_data::MaxData;
pub use max_stream_data::MaxStreamData;
pub use padding::Padding;
pub use ping::Ping;
pub use reset_stream::ResetStream;
pub use stream::Stream;

pub(crate) type Tag = u8;

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
//# The payload of QUIC packets, after removing packet protection, consists
//# of a sequence of complete frames.

/// A parsed QUIC frame; payload-bearing variants borrow from the packet
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Padding(Padding),
    Ping(Ping),
    Ack(Ack),
    ResetStream(ResetStream),
    Crypto(Crypto<'a>),
    Stream(Stream<'a>),
    MaxData(MaxData),
    MaxStreamData(MaxStreamData),
    ConnectionClose(ConnectionClose<'a>),
    HandshakeDone(HandshakeDone),
}

impl Frame<'_> {
    /// Returns the frame's wire tag
    pub fn tag(&self) -> Tag {
        match self {
            Frame::Padding(frame) => frame.tag(),
            Frame::Ping(frame) => frame.tag(),
            Frame::Ack(frame) => frame.tag(),
            Frame::ResetStream(frame) => frame.tag(),
            Frame::Crypto(frame) => frame.tag(),
            Frame::Stream(frame) => frame.tag(),
            Frame::MaxData(frame) => frame.tag(),
            Frame::MaxStreamData(frame) => frame.tag(),
            Frame::ConnectionClose(frame) => frame.tag(),
            Frame::HandshakeDone(frame) => frame.tag(),
        }
    }

    /// Returns whether receipt of this frame obligates the peer to send an ACK
    //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
    //# all packets other than ACK, PADDING, and CONNECTION_CLOSE
    //# frames are considered ack-eliciting.
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(
            self,
            Frame::Ack(_) | Frame::Padding(_) | Frame::ConnectionClose(_)
        )
    }
}

impl<'a> Frame<'a> {
    /// Decodes a single frame from the front of `buffer`
    pub fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Frame<'a>> {
        let tag = buffer.peek_byte(0)?;

        macro_rules! parameterized {
            ($variant:ident) => {{
                let buffer = buffer.skip(core::mem::size_of::<Tag>())?;
                let (frame, buffer) = buffer.decode_parameterized(tag)?;
                Ok((Frame::$variant(frame), buffer))
            }};
        }

        match tag {
            padding::TAG => parameterized!(Padding),
            ping::TAG => parameterized!(Ping),
            ack::TAG => parameterized!(Ack),
            reset_stream::TAG => parameterized!(ResetStream),
            crypto::TAG => parameterized!(Crypto),
            stream::TAG_RANGE_START..=stream::TAG_RANGE_END => parameterized!(Stream),
            max_data::TAG => parameterized!(MaxData),
            max_stream_data::TAG => parameterized!(MaxStreamData),
            connection_close::TRANSPORT_TAG | connection_close::APPLICATION_TAG => {
                parameterized!(ConnectionClose)
            }
            handshake_done::TAG => parameterized!(HandshakeDone),
            _ => Err(DecoderError::InvariantViolation("invalid frame")),
        }
    }

    /// Decodes every frame in `buffer`, which must contain only whole frames
    #[cfg(feature = "alloc")]
    pub fn decode_all(mut buffer: DecoderBuffer<'a>) -> Result<alloc::vec::Vec<Self>, DecoderError>
    where
        Self: Sized,
    {
        let mut frames = alloc::vec::Vec::new();
        while !buffer.is_empty() {
            let (frame, remaining) = Self::decode(buffer)?;
            frames.push(frame);
            buffer = remaining;
        }
        Ok(frames)
    }
}

impl EncoderValue for Frame<'_> {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        match self {
            Frame::Padding(frame) => buffer.encode(frame),
            Frame::Ping(frame) => buffer.encode(frame),
            Frame::Ack(frame) => buffer.encode(frame),
            Frame::ResetStream(frame) => buffer.encode(frame),
            Frame::Crypto(frame) => buffer.encode(frame),
            Frame::Stream(frame) => buffer.encode(frame),
            Frame::MaxData(frame) => buffer.encode(frame),
            Frame::MaxStreamData(frame) => buffer.encode(frame),
            Frame::ConnectionClose(frame) => buffer.encode(frame),
            Frame::HandshakeDone(frame) => buffer.encode(frame),
        }
    }
}

macro_rules! impl_frame_conversion {
    ($ty:ident) => {
        impl<'a> From<$ty> for Frame<'a> {
            #[inline]
            fn from(frame: $ty) -> Self {
                Frame::$ty(frame)
            }
        }
    };
}

impl_frame_conversion!(Padding);
impl_frame_conversion!(Ping);
impl_frame_conversion!(Ack);
impl_frame_conversion!(ResetStream);
impl_frame_conversion!(MaxData);
impl_frame_conversion!(MaxStreamData);
impl_frame_conversion!(HandshakeDone);

impl<'a> From<Crypto<'a>> for Frame<'a> {
    #[inline]
    fn from(frame: Crypto<'a>) -> Self {
        Frame::Crypto(frame)
    }
}

impl<'a> From<Stream<'a>> for Frame<'a> {
    #[inline]
    fn from(frame: Stream<'a>) -> Self {
        Frame::Stream(frame)
    }
}

impl<'a> From<ConnectionClose<'a>> for Frame<'a> {
    #[inline]
    fn from(frame: ConnectionClose<'a>) -> Self {
        Frame::ConnectionClose(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint::VarInt;
    use tern_codec::EncoderBuffer;

    fn round_trip(frame: Frame) {
        let mut data = [0u8; 1500];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut data);
            encoder.encode(&frame);
            encoder.len()
        };

        let (decoded, remaining) = Frame::decode(DecoderBuffer::new(&data[..len])).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn dispatch_round_trip_test() {
        round_trip(Frame::Ping(Ping));
        round_trip(Frame::HandshakeDone(HandshakeDone));
        round_trip(Frame::MaxData(MaxData {
            maximum_data: VarInt::from_u32(123_456),
        }));
        round_trip(Frame::MaxStreamData(MaxStreamData {
            stream_id: VarInt::from_u8(4),
            maximum_stream_data: VarInt::from_u32(65_536),
        }));
        round_trip(Frame::ResetStream(ResetStream {
            stream_id: VarInt::from_u8(8),
            application_error_code: VarInt::from_u8(7),
            final_size: VarInt::from_u16(2048),
        }));
        round_trip(Frame::Crypto(Crypto {
            offset: VarInt::from_u16(512),
            data: b"handshake bytes",
        }));
        round_trip(Frame::ConnectionClose(ConnectionClose {
            error_code: VarInt::from_u8(0x0a),
            frame_type: Some(VarInt::ZERO),
            reason: b"protocol violation",
        }));
    }

    #[test]
    fn unknown_tag_test() {
        // greased/extension tags are rejected
        let data = [0x40u8, 0x00];
        assert!(Frame::decode(DecoderBuffer::new(&data)).is_err());
        let data = [0x1fu8];
        assert!(Frame::decode(DecoderBuffer::new(&data)).is_err());
    }

    #[test]
    fn decode_never_panics_test() {
        bolero::check!().for_each(|bytes: &[u8]| {
            let _ = Frame::decode_all(DecoderBuffer::new(bytes));
        });
    }

    #[test]
    fn ack_elicitation_test() {
        assert!(Frame::Ping(Ping).is_ack_eliciting());
        assert!(!Frame::Ack(Ack::new(VarInt::ZERO, VarInt::ZERO)).is_ack_eliciting());
        assert!(!Frame::Padding(Padding { length: 3 }).is_ack_eliciting());
        assert!(Frame::Stream(Stream {
            stream_id: VarInt::ZERO,
            offset: VarInt::ZERO,
            data: b"",
            is_fin: true,
        })
        .is_ack_eliciting());
    }
}
