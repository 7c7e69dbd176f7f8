// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Owned frames queued for transmission.
//!
//! Parsed frames borrow from the datagram; queued and retransmitted frames
//! need ownership of their payloads. [`PendingFrame`] is the owned mirror
//! that encodes back into wire frames at packet-build time.

use tern_codec::{Encoder, EncoderValue};
use tern_core::{
    frame::{self, Frame},
    varint::VarInt,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingFrame {
    Ping,
    Crypto {
        offset: u64,
        data: Vec<u8>,
    },
    Stream {
        id: u64,
        offset: u64,
        data: Vec<u8>,
        fin: bool,
    },
    MaxData {
        maximum_data: u64,
    },
    MaxStreamData {
        id: u64,
        maximum_stream_data: u64,
    },
    ResetStream {
        id: u64,
        error_code: u64,
        final_size: u64,
    },
    HandshakeDone,
    ConnectionClose {
        error_code: u64,
        frame_type: Option<u64>,
        reason: Vec<u8>,
    },
}

impl PendingFrame {
    /// Returns whether a packet carrying this frame must be retransmitted
    /// until acknowledged
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(self, Self::ConnectionClose { .. })
    }

    /// Borrows this frame as a wire frame
    pub fn as_frame(&self) -> Frame<'_> {
        match self {
            Self::Ping => Frame::Ping(frame::Ping),
            Self::Crypto { offset, data } => Frame::Crypto(frame::Crypto {
                offset: varint(*offset),
                data,
            }),
            Self::Stream {
                id,
                offset,
                data,
                fin,
            } => Frame::Stream(frame::Stream {
                stream_id: varint(*id),
                offset: varint(*offset),
                data,
                is_fin: *fin,
            }),
            Self::MaxData { maximum_data } => Frame::MaxData(frame::MaxData {
                maximum_data: varint(*maximum_data),
            }),
            Self::MaxStreamData {
                id,
                maximum_stream_data,
            } => Frame::MaxStreamData(frame::MaxStreamData {
                stream_id: varint(*id),
                maximum_stream_data: varint(*maximum_stream_data),
            }),
            Self::ResetStream {
                id,
                error_code,
                final_size,
            } => Frame::ResetStream(frame::ResetStream {
                stream_id: varint(*id),
                application_error_code: varint(*error_code),
                final_size: varint(*final_size),
            }),
            Self::HandshakeDone => Frame::HandshakeDone(frame::HandshakeDone),
            Self::ConnectionClose {
                error_code,
                frame_type,
                reason,
            } => Frame::ConnectionClose(frame::ConnectionClose {
                error_code: varint(*error_code),
                frame_type: frame_type.map(varint),
                reason,
            }),
        }
    }
}

impl EncoderValue for PendingFrame {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        self.as_frame().encode(encoder)
    }
}

fn varint(value: u64) -> VarInt {
    VarInt::new(value).unwrap_or(VarInt::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_codec::DecoderBuffer;

    #[test]
    fn owned_frames_encode_as_wire_frames_test() {
        let pending = PendingFrame::Stream {
            id: 4,
            offset: 100,
            data: b"payload".to_vec(),
            fin: true,
        };

        let encoded = pending.encode_to_vec();
        let (decoded, _) = Frame::decode(DecoderBuffer::new(&encoded)).unwrap();
        assert_eq!(decoded, pending.as_frame());
    }

    #[test]
    fn close_is_not_ack_eliciting_test() {
        let close = PendingFrame::ConnectionClose {
            error_code: 0,
            frame_type: None,
            reason: Vec::new(),
        };
        assert!(!close.is_ack_eliciting());
        assert!(PendingFrame::Ping.is_ack_eliciting());
    }
}
