// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::Tag;
use tern_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.1
//# A PADDING frame (type=0x00) has no semantic value.

pub const TAG: Tag = 0x00;

/// A run of padding bytes. `length` counts every padding byte, including
/// the tag itself; consecutive padding bytes decode as a single frame.
#[derive(Debug, PartialEq, Eq)]
pub struct Padding {
    pub length: usize,
}

impl Padding {
    #[inline]
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> Padding {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let mut length = 1;
            let mut remaining = buffer;
            while remaining.peek_byte(0) == Ok(0) {
                remaining = remaining.skip(1)?;
                length += 1;
            }

            Ok((Padding { length }, remaining))
        }
    }
);

impl EncoderValue for Padding {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.write_repeated(self.length, 0);
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.length
    }
}
