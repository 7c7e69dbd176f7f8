// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use tern_codec::DecoderError;

/// A violation of the HTTP/2 framing rules
#[derive(Clone, Copy, Debug, PartialEq, Eq, displaydoc::Display)]
#[non_exhaustive]
pub enum FrameError {
    /// the buffer ended inside a frame
    Truncated,
    /// frame type {0:#04x} is not recognized
    UnknownType(u8),
    /// frame type {0:#04x} requires a nonzero stream id
    StreamIdRequired(u8),
    /// frame type {0:#04x} must be sent on stream 0
    StreamIdForbidden(u8),
    /// the reserved stream-id bit was set
    ReservedBitSet,
    /// frame type {frame_type:#04x} requires a payload of {expected} bytes, got {actual}
    PayloadLength {
        frame_type: u8,
        expected: usize,
        actual: usize,
    },
    /// a SETTINGS payload must be a multiple of 6 bytes
    SettingsLength,
    /// a SETTINGS acknowledgement must carry an empty payload
    SettingsAckPayload,
    /// the pad length exceeds the frame payload
    PaddingTooLarge,
    /// a GOAWAY payload must carry at least 8 bytes
    GoAwayLength,
    /// a WINDOW_UPDATE increment must be nonzero
    ZeroWindowIncrement,
    /// the frame length exceeds the 2^24-1 maximum
    FrameTooLarge,
}

impl From<DecoderError> for FrameError {
    fn from(_: DecoderError) -> Self {
        Self::Truncated
    }
}

impl std::error::Error for FrameError {}
