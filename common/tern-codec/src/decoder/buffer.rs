// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::decoder::{
    value::{DecoderParameterizedValue, DecoderValue},
    DecoderError,
};

pub type DecoderBufferResult<'a, T> = Result<(T, DecoderBuffer<'a>), DecoderError>;

/// DecoderBuffer is a panic-free byte buffer for look-ahead decoding untrusted input
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct DecoderBuffer<'a> {
    bytes: &'a [u8],
}

impl<'a> DecoderBuffer<'a> {
    /// Create a new `DecoderBuffer` from a byte slice
    #[inline]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Move out the buffer's slice. This should be used with caution, as it
    /// removes any panic protection this struct provides.
    #[inline]
    pub fn into_less_safe_slice(self) -> &'a [u8] {
        self.bytes
    }

    /// Borrow the buffer's slice. This should be used with caution, as it
    /// removes any panic protection this struct provides.
    #[inline]
    pub fn as_less_safe_slice(&self) -> &'a [u8] {
        self.bytes
    }

    /// Decode a slice of `count` bytes, removing the slice from the current buffer
    #[inline]
    pub fn decode_slice(self, count: usize) -> DecoderBufferResult<'a, DecoderBuffer<'a>> {
        self.ensure_len(count)?;

        let (slice, remaining) = self.bytes.split_at(count);

        Ok((Self::new(slice), Self::new(remaining)))
    }

    /// Decode a value of type `T`, splitting the data from the current buffer
    #[inline]
    pub fn decode<T: DecoderValue<'a>>(self) -> DecoderBufferResult<'a, T> {
        T::decode(self)
    }

    /// Decode a slice prefixed by type `Length`, splitting the data from the
    /// current buffer
    #[inline]
    pub fn decode_slice_with_len_prefix<Length>(self) -> DecoderBufferResult<'a, Self>
    where
        Length: DecoderValue<'a> + core::convert::TryInto<usize>,
    {
        let (len, buffer) = self.decode::<Length>()?;
        let len = len
            .try_into()
            .map_err(|_| DecoderError::LengthCapacityExceeded)?;
        buffer.decode_slice(len)
    }

    /// Decode a value of type `T` prefixed by type `Length`. The `T`
    /// implementation must consume the entire subslice, otherwise an error is
    /// returned.
    #[inline]
    pub fn decode_with_len_prefix<Length, T>(self) -> DecoderBufferResult<'a, T>
    where
        Length: DecoderValue<'a> + core::convert::TryInto<usize>,
        T: DecoderValue<'a>,
    {
        let (slice, buffer) = self.decode_slice_with_len_prefix::<Length>()?;
        let (value, slice) = slice.decode::<T>()?;
        slice.ensure_empty()?;
        Ok((value, buffer))
    }

    /// Decode a parameterized value of type `T`
    #[inline]
    pub fn decode_parameterized<T: DecoderParameterizedValue<'a>>(
        self,
        parameter: T::Parameter,
    ) -> DecoderBufferResult<'a, T> {
        T::decode_parameterized(parameter, self)
    }

    /// Skip a `count` of bytes, discarding them
    #[inline]
    pub fn skip(self, count: usize) -> Result<DecoderBuffer<'a>, DecoderError> {
        self.decode_slice(count).map(|(_, buffer)| buffer)
    }

    /// Skip a number of bytes encoded as a length prefix of type `Length`
    #[inline]
    pub fn skip_with_len_prefix<Length>(self) -> Result<DecoderBuffer<'a>, DecoderError>
    where
        Length: DecoderValue<'a> + core::convert::TryInto<usize>,
    {
        let (len, buffer) = self.decode::<Length>()?;
        let len = len
            .try_into()
            .map_err(|_| DecoderError::LengthCapacityExceeded)?;
        buffer.skip(len)
    }

    /// Create a peeking `DecoderBuffer` from the current buffer view
    #[inline]
    #[must_use]
    pub fn peek(&self) -> DecoderBuffer<'a> {
        DecoderBuffer::new(self.bytes)
    }

    /// Returns a single byte at `index`
    #[inline]
    pub fn peek_byte(&self, index: usize) -> Result<u8, DecoderError> {
        self.bytes
            .get(index)
            .cloned()
            .ok_or(DecoderError::UnexpectedEof(index))
    }

    /// Returns an error if the buffer is not empty
    #[inline]
    pub fn ensure_empty(&self) -> Result<(), DecoderError> {
        if !self.is_empty() {
            Err(DecoderError::UnexpectedBytes(self.len()))
        } else {
            Ok(())
        }
    }

    /// Returns an error if the buffer does not have at least `len` bytes
    #[inline]
    pub fn ensure_len(&self, len: usize) -> Result<(), DecoderError> {
        if self.len() < len {
            Err(DecoderError::UnexpectedEof(len))
        } else {
            Ok(())
        }
    }

    /// Returns the number of bytes in the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the buffer has a length of 0
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl<'a> From<&'a [u8]> for DecoderBuffer<'a> {
    #[inline]
    fn from(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

impl PartialEq<[u8]> for DecoderBuffer<'_> {
    #[inline]
    fn eq(&self, rhs: &[u8]) -> bool {
        self.bytes.eq(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_slice_test() {
        let data = [0u8, 1, 2, 3, 4];
        let buffer = DecoderBuffer::new(&data);

        let (slice, buffer) = buffer.decode_slice(3).unwrap();
        assert_eq!(slice, [0u8, 1, 2][..]);
        assert_eq!(buffer.len(), 2);

        assert!(buffer.decode_slice(3).is_err());
    }

    #[test]
    fn decode_with_len_prefix_test() {
        let data = [2u8, 0, 1, 2, 3];
        let buffer = DecoderBuffer::new(&data);
        let (value, buffer) = buffer.decode_with_len_prefix::<u8, u16>().unwrap();
        assert_eq!(value, 1);
        assert_eq!(buffer, [2, 3][..]);

        // the inner value must consume the entire subslice
        let data = [3u8, 0, 1, 2];
        let buffer = DecoderBuffer::new(&data);
        assert!(buffer.decode_with_len_prefix::<u8, u16>().is_err());
    }

    #[test]
    fn peek_byte_test() {
        let data = [7u8, 8];
        let buffer = DecoderBuffer::new(&data);
        assert_eq!(buffer.peek_byte(0).unwrap(), 7);
        assert_eq!(buffer.peek_byte(1).unwrap(), 8);
        assert!(buffer.peek_byte(2).is_err());
        // the buffer has not changed
        assert_eq!(buffer.len(), 2);
    }
}
