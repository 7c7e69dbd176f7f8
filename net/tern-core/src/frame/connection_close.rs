// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use tern_codec::{decoder_parameterized_value, DecoderBuffer, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.19
//# An endpoint sends a CONNECTION_CLOSE frame (type=0x1c or 0x1d) to
//# notify its peer that the connection is being closed.

/// Closes with a transport-level error; carries the offending frame type
pub const TRANSPORT_TAG: Tag = 0x1c;
/// Closes with an application-level error
pub const APPLICATION_TAG: Tag = 0x1d;

#[derive(Debug, PartialEq, Eq)]
pub struct ConnectionClose<'a> {
    /// The error code the connection is closing with
    pub error_code: VarInt,
    /// The type of the frame that triggered the error; `None` for
    /// application-level closes
    pub frame_type: Option<VarInt>,
    /// A human-readable reason, not null-terminated
    pub reason: &'a [u8],
}

impl ConnectionClose<'_> {
    #[inline]
    pub fn tag(&self) -> Tag {
        if self.frame_type.is_some() {
            TRANSPORT_TAG
        } else {
            APPLICATION_TAG
        }
    }

    /// Returns the reason as UTF-8, if valid
    #[inline]
    pub fn reason_str(&self) -> Option<&str> {
        core::str::from_utf8(self.reason).ok()
    }
}

decoder_parameterized_value!(
    impl<'a> ConnectionClose<'a> {
        fn decode(tag: Tag, buffer: Buffer) -> Result<Self> {
            let (error_code, buffer) = buffer.decode()?;

            let (frame_type, buffer) = if tag == TRANSPORT_TAG {
                let (frame_type, buffer) = buffer.decode()?;
                (Some(frame_type), buffer)
            } else {
                (None, buffer)
            };

            let (reason, buffer) = buffer.decode_with_len_prefix::<VarInt, DecoderBuffer>()?;

            let frame = ConnectionClose {
                error_code,
                frame_type,
                reason: reason.into_less_safe_slice(),
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for ConnectionClose<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.error_code);
        if let Some(frame_type) = self.frame_type {
            buffer.encode(&frame_type);
        }
        buffer.encode_with_len_prefix::<VarInt, _>(&self.reason);
    }
}
