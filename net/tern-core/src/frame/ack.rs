// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use core::ops::RangeInclusive;
use smallvec::SmallVec;
use tern_codec::{decoder_parameterized_value, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# Receivers send ACK frames (types 0x02 and 0x03) to inform senders of
//# packets they have received and processed.

// ECN counts (type 0x03) are not produced or consumed
pub const TAG: Tag = 0x02;

/// A set of acknowledged packet numbers, kept as ascending inclusive ranges
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AckRanges {
    // (smallest, largest) pairs, ascending, disjoint, non-adjacent
    ranges: SmallVec<[(u64, u64); 4]>,
}

impl AckRanges {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a packet number, merging ranges that become adjacent
    pub fn insert(&mut self, packet_number: u64) {
        let pn = packet_number;
        let mut index = 0;

        for (i, (smallest, largest)) in self.ranges.iter_mut().enumerate() {
            if pn >= *smallest && pn <= *largest {
                return;
            }
            if pn + 1 == *smallest {
                *smallest = pn;
                self.merge_at(i);
                return;
            }
            if *largest + 1 == pn {
                *largest = pn;
                self.merge_at(i);
                return;
            }
            if pn < *smallest {
                index = i;
                break;
            }
            index = i + 1;
        }

        self.ranges.insert(index, (pn, pn));
    }

    fn merge_at(&mut self, index: usize) {
        if index + 1 < self.ranges.len() && self.ranges[index].1 + 1 >= self.ranges[index + 1].0 {
            let (_, next_largest) = self.ranges.remove(index + 1);
            self.ranges[index].1 = self.ranges[index].1.max(next_largest);
        }
        if index > 0 && self.ranges[index - 1].1 + 1 >= self.ranges[index].0 {
            let (_, largest) = self.ranges.remove(index);
            self.ranges[index - 1].1 = self.ranges[index - 1].1.max(largest);
        }
    }

    #[inline]
    pub fn contains(&self, packet_number: u64) -> bool {
        self.ranges
            .iter()
            .any(|(smallest, largest)| packet_number >= *smallest && packet_number <= *largest)
    }

    #[inline]
    pub fn largest(&self) -> Option<u64> {
        self.ranges.last().map(|(_, largest)| *largest)
    }

    #[inline]
    pub fn smallest(&self) -> Option<u64> {
        self.ranges.first().map(|(smallest, _)| *smallest)
    }

    /// Iterates the acknowledged ranges in ascending order
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = RangeInclusive<u64>> + '_ {
        self.ranges.iter().map(|(smallest, largest)| *smallest..=*largest)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl FromIterator<u64> for AckRanges {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut ranges = Self::new();
        for pn in iter {
            ranges.insert(pn);
        }
        ranges
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Ack {
    /// The acknowledgement delay reported by the peer, in its own units
    pub ack_delay: VarInt,
    /// The acknowledged packet numbers
    pub ranges: AckRanges,
}

impl Ack {
    /// Creates an ACK of the single packet `largest`
    #[inline]
    pub fn new(largest: VarInt, ack_delay: VarInt) -> Self {
        let mut ranges = AckRanges::new();
        ranges.insert(largest.as_u64());
        Self { ack_delay, ranges }
    }

    #[inline]
    pub fn from_ranges(ranges: AckRanges, ack_delay: VarInt) -> Self {
        debug_assert!(!ranges.is_empty(), "an ACK must acknowledge something");
        Self { ack_delay, ranges }
    }

    #[inline]
    pub const fn tag(&self) -> Tag {
        TAG
    }

    #[inline]
    pub fn largest_acknowledged(&self) -> u64 {
        self.ranges.largest().unwrap_or(0)
    }
}

decoder_parameterized_value!(
    impl<'a> Ack {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (largest, buffer) = buffer.decode::<VarInt>()?;
            let (ack_delay, buffer) = buffer.decode::<VarInt>()?;
            let (range_count, buffer) = buffer.decode::<VarInt>()?;
            let (first_range, buffer) = buffer.decode::<VarInt>()?;

            let largest = largest.as_u64();
            let mut smallest = largest
                .checked_sub(first_range.as_u64())
                .ok_or(DecoderError::InvariantViolation("malformed ack range"))?;

            let mut descending: SmallVec<[(u64, u64); 4]> = SmallVec::new();
            descending.push((smallest, largest));

            let mut buffer = buffer;
            for _ in 0..range_count.as_u64() {
                let (gap, remaining) = buffer.decode::<VarInt>()?;
                let (len, remaining) = remaining.decode::<VarInt>()?;
                buffer = remaining;

                //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
                //# The value of the Gap field establishes the largest packet
                //# number value for the subsequent ACK Range using the
                //# following formula:
                //#    largest = previous_smallest - gap - 2
                let block_largest = smallest
                    .checked_sub(gap.as_u64())
                    .and_then(|value| value.checked_sub(2))
                    .ok_or(DecoderError::InvariantViolation("malformed ack gap"))?;
                let block_smallest = block_largest
                    .checked_sub(len.as_u64())
                    .ok_or(DecoderError::InvariantViolation("malformed ack range"))?;

                descending.push((block_smallest, block_largest));
                smallest = block_smallest;
            }

            descending.reverse();
            let frame = Ack {
                ack_delay,
                ranges: AckRanges { ranges: descending },
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for Ack {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        let mut blocks = self.ranges.ranges.iter().rev();
        let (first_smallest, first_largest) = blocks.clone().next().copied().unwrap_or((0, 0));

        buffer.encode(&TAG);
        buffer.encode(&VarInt::new(first_largest).unwrap_or(VarInt::MAX));
        buffer.encode(&self.ack_delay);
        buffer.encode(
            &VarInt::new(self.ranges.ranges.len().saturating_sub(1) as u64)
                .unwrap_or(VarInt::MAX),
        );
        buffer.encode(&VarInt::new(first_largest - first_smallest).unwrap_or(VarInt::MAX));

        let mut previous_smallest = first_smallest;
        for (smallest, largest) in blocks.skip(1) {
            let gap = previous_smallest - largest - 2;
            let len = largest - smallest;
            buffer.encode(&VarInt::new(gap).unwrap_or(VarInt::MAX));
            buffer.encode(&VarInt::new(len).unwrap_or(VarInt::MAX));
            previous_smallest = *smallest;
        }
    }
}
