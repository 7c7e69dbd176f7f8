// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use tern_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.10
//# A MAX_STREAM_DATA frame (type=0x11) is used in flow control to inform
//# a peer of the maximum amount of data that can be sent on a stream.

pub const TAG: Tag = 0x11;

#[derive(Debug, PartialEq, Eq)]
pub struct MaxStreamData {
    /// The stream the limit applies to
    pub stream_id: VarInt,
    /// The maximum amount of data that can be sent on the stream
    pub maximum_stream_data: VarInt,
}

impl MaxStreamData {
    #[inline]
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> MaxStreamData {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (stream_id, buffer) = buffer.decode()?;
            let (maximum_stream_data, buffer) = buffer.decode()?;
            Ok((
                MaxStreamData {
                    stream_id,
                    maximum_stream_data,
                },
                buffer,
            ))
        }
    }
);

impl EncoderValue for MaxStreamData {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&TAG);
        buffer.encode(&self.stream_id);
        buffer.encode(&self.maximum_stream_data);
    }
}
