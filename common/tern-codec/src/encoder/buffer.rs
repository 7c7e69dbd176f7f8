// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::encoder::Encoder;

/// An encoder over a fixed, mutable byte slice
#[derive(Debug)]
pub struct EncoderBuffer<'a> {
    bytes: &'a mut [u8],
    position: usize,
}

impl<'a> EncoderBuffer<'a> {
    /// Creates a new `EncoderBuffer` at position 0
    #[inline]
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Sets the write position of the buffer
    ///
    /// # Panics
    ///
    /// Panics when `position > capacity`
    #[inline]
    pub fn set_position(&mut self, position: usize) {
        assert!(position <= self.bytes.len());
        self.position = position;
    }

    /// Advances the write position by `len` bytes
    ///
    /// # Panics
    ///
    /// Panics when there is not enough remaining capacity
    #[inline]
    pub fn advance_position(&mut self, len: usize) {
        let position = self.position + len;
        self.set_position(position)
    }

    /// Splits off the used portion of the buffer from the remaining capacity
    #[inline]
    pub fn split_off(self) -> (&'a mut [u8], &'a mut [u8]) {
        self.bytes.split_at_mut(self.position)
    }

    /// Returns the written bytes as a mutable slice
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.position]
    }

    #[inline]
    fn assert_capacity(&self, len: usize) {
        assert!(
            len <= self.remaining_capacity(),
            "not enough encoder capacity: needed {}, remaining {}",
            len,
            self.remaining_capacity()
        );
    }
}

impl Encoder for EncoderBuffer<'_> {
    #[inline]
    fn write_sized<F: FnOnce(&mut [u8])>(&mut self, len: usize, write: F) {
        self.assert_capacity(len);
        let end = self.position + len;
        write(&mut self.bytes[self.position..end]);
        self.position = end;
    }

    #[inline]
    fn write_slice(&mut self, slice: &[u8]) {
        self.write_sized(slice.len(), |dest| dest.copy_from_slice(slice));
    }

    #[inline]
    fn write_repeated(&mut self, count: usize, value: u8) {
        self.write_sized(count, |dest| {
            for byte in dest {
                *byte = value;
            }
        });
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    fn len(&self) -> usize {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_slice_test() {
        let mut data = [0u8; 8];
        let mut encoder = EncoderBuffer::new(&mut data);
        encoder.write_slice(&[1, 2, 3]);
        encoder.encode(&4u8);
        assert_eq!(encoder.len(), 4);
        assert_eq!(encoder.remaining_capacity(), 4);
        assert_eq!(&data[..4], &[1, 2, 3, 4]);
    }

    #[test]
    #[should_panic]
    fn write_past_capacity_test() {
        let mut data = [0u8; 2];
        let mut encoder = EncoderBuffer::new(&mut data);
        encoder.write_slice(&[1, 2, 3]);
    }
}
