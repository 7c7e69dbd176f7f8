// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use tern_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.4
//# An endpoint uses a RESET_STREAM frame (type=0x04) to abruptly
//# terminate the sending part of a stream.

pub const TAG: Tag = 0x04;

#[derive(Debug, PartialEq, Eq)]
pub struct ResetStream {
    /// The stream being terminated
    pub stream_id: VarInt,
    /// The application's reason for the reset
    pub application_error_code: VarInt,
    /// The number of bytes written on the stream before the reset
    pub final_size: VarInt,
}

impl ResetStream {
    #[inline]
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> ResetStream {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (stream_id, buffer) = buffer.decode()?;
            let (application_error_code, buffer) = buffer.decode()?;
            let (final_size, buffer) = buffer.decode()?;
            Ok((
                ResetStream {
                    stream_id,
                    application_error_code,
                    final_size,
                },
                buffer,
            ))
        }
    }
);

impl EncoderValue for ResetStream {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&TAG);
        buffer.encode(&self.stream_id);
        buffer.encode(&self.application_error_code);
        buffer.encode(&self.final_size);
    }
}
