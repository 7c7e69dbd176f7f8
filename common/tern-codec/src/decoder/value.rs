// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::decoder::buffer::{DecoderBuffer, DecoderBufferResult};
use byteorder::{ByteOrder, NetworkEndian};
use core::mem::size_of;

pub trait DecoderValue<'a>: Sized {
    fn decode(bytes: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self>;
}

/// Implements [`DecoderValue`] for a type with a `Buffer`-style body
#[macro_export]
macro_rules! decoder_value {
    (impl<$lt:lifetime $(, $generic:ident)*> $ty:ty {
        fn decode($buffer:ident: Buffer) -> Result<$ret:ty> $impl:block
    }) => {
        impl<$lt $(, $generic: $crate::DecoderValue<$lt>)*> $crate::DecoderValue<$lt> for $ty {
            #[inline]
            fn decode($buffer: $crate::DecoderBuffer<$lt>) -> $crate::DecoderBufferResult<$lt, $ret> $impl
        }
    };
}

macro_rules! decoder_value_byte {
    ($ty:ident) => {
        decoder_value!(
            impl<'a> $ty {
                fn decode(buffer: Buffer) -> Result<Self> {
                    let (value, buffer) = buffer.decode_slice(size_of::<Self>())?;
                    let value = value.as_less_safe_slice()[0] as $ty;
                    Ok((value, buffer))
                }
            }
        );
    };
}

decoder_value_byte!(u8);
decoder_value_byte!(i8);

macro_rules! decoder_value_network_endian {
    ($call:ident, $ty:ty) => {
        decoder_value!(
            impl<'a> $ty {
                fn decode(buffer: Buffer) -> Result<Self> {
                    let (value, buffer) = buffer.decode_slice(size_of::<Self>())?;
                    let value = NetworkEndian::$call(value.as_less_safe_slice());
                    Ok((value, buffer))
                }
            }
        );
    };
}

decoder_value_network_endian!(read_u16, u16);
decoder_value_network_endian!(read_i16, i16);
decoder_value_network_endian!(read_u32, u32);
decoder_value_network_endian!(read_i32, i32);
decoder_value_network_endian!(read_u64, u64);
decoder_value_network_endian!(read_i64, i64);
decoder_value_network_endian!(read_u128, u128);
decoder_value_network_endian!(read_i128, i128);

decoder_value!(
    impl<'a> DecoderBuffer<'a> {
        fn decode(buffer: Buffer) -> Result<Self> {
            let len = buffer.len();
            buffer.decode_slice(len)
        }
    }
);

decoder_value!(
    impl<'a> () {
        fn decode(buffer: Buffer) -> Result<Self> {
            Ok(((), buffer))
        }
    }
);

#[cfg(feature = "alloc")]
decoder_value!(
    impl<'a> alloc::vec::Vec<u8> {
        fn decode(buffer: Buffer) -> Result<Self> {
            let len = buffer.len();
            let (slice, buffer) = buffer.decode_slice(len)?;
            Ok((slice.as_less_safe_slice().to_vec(), buffer))
        }
    }
);

#[cfg(feature = "bytes")]
decoder_value!(
    impl<'a> bytes::Bytes {
        fn decode(buffer: Buffer) -> Result<Self> {
            let len = buffer.len();
            let (slice, buffer) = buffer.decode_slice(len)?;
            let bytes = bytes::Bytes::copy_from_slice(slice.as_less_safe_slice());
            Ok((bytes, buffer))
        }
    }
);

/// A value whose decoding implementation is altered by a provided parameter
pub trait DecoderParameterizedValue<'a>: Sized {
    type Parameter;

    fn decode_parameterized(
        parameter: Self::Parameter,
        bytes: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, Self>;
}

/// Implements [`DecoderParameterizedValue`] for a type with a `Buffer`-style body
#[macro_export]
macro_rules! decoder_parameterized_value {
    (impl<$lt:lifetime $(, $generic:ident)*> $ty:ty {
        fn decode($tag:ident: $tag_ty:ty, $buffer:ident: Buffer) -> Result<$ret:ty> $impl:block
    }) => {
        impl<$lt $(, $generic: $crate::DecoderValue<$lt>)*> $crate::DecoderParameterizedValue<$lt> for $ty {
            type Parameter = $tag_ty;

            #[inline]
            fn decode_parameterized($tag: Self::Parameter, $buffer: $crate::DecoderBuffer<$lt>) -> $crate::DecoderBufferResult<$lt, $ret> $impl
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EncoderBuffer, EncoderValue};
    use bolero::check;

    #[test]
    fn integer_round_trip_test() {
        check!().with_type::<(u16, u32, u64)>().cloned().for_each(
            |(first, second, third)| {
                let mut data = [0u8; 14];
                let mut encoder = EncoderBuffer::new(&mut data);
                first.encode(&mut encoder);
                second.encode(&mut encoder);
                third.encode(&mut encoder);

                let buffer = DecoderBuffer::new(&data);
                let (a, buffer) = buffer.decode::<u16>().unwrap();
                let (b, buffer) = buffer.decode::<u32>().unwrap();
                let (c, buffer) = buffer.decode::<u64>().unwrap();
                assert!(buffer.is_empty());
                assert_eq!((a, b, c), (first, second, third));
            },
        );
    }

    #[test]
    fn network_endian_test() {
        let data = [0u8, 1, 2, 3, 4, 5, 6, 7];
        let buffer = DecoderBuffer::new(&data);

        let (value, buffer) = buffer.decode::<u8>().unwrap();
        assert_eq!(value, 0);

        let (value, buffer) = buffer.decode::<u16>().unwrap();
        assert_eq!(value, 0x0102);

        let (value, buffer) = buffer.decode::<u32>().unwrap();
        assert_eq!(value, 0x0304_0506);

        assert_eq!(buffer.len(), 1);
        assert!(buffer.decode::<u16>().is_err());
    }
}
