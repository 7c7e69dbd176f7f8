// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packet-number truncation and expansion.
//!
//! Packet numbers are truncated on the wire per encryption-level epoch; the
//! receiver reconstructs the full value from the largest number it has
//! processed in that space.

/// Chooses the wire encoding for `packet_number`, given the largest
/// acknowledged number in the same space.
///
/// Returns the truncated value and its length in bytes (1-4).
//= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
//# The sender MUST use a packet number size able to represent more than
//# twice as large a range as the difference between the largest
//# acknowledged packet number and the packet number being sent.
#[inline]
pub fn truncate(packet_number: u64, largest_acked: Option<u64>) -> (u64, usize) {
    let num_unacked = match largest_acked {
        Some(largest) => packet_number - largest,
        None => packet_number + 1,
    };

    let min_bits = 64 - num_unacked.leading_zeros() + 1;
    let len = (min_bits as usize).div_ceil(8).clamp(1, 4);

    let mask = if len == 8 { u64::MAX } else { (1u64 << (len * 8)) - 1 };
    (packet_number & mask, len)
}

/// Reconstructs a full packet number from its truncated wire form
//= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.3
#[inline]
pub fn expand(truncated: u64, len: usize, largest: Option<u64>) -> u64 {
    let truncated_bits = (len * 8) as u32;
    let expected = match largest {
        Some(largest) => largest + 1,
        None => 0,
    };

    let win = 1u64 << truncated_bits;
    let hwin = win / 2;
    let mask = win - 1;

    let candidate = (expected & !mask) | truncated;

    if candidate + hwin <= expected && candidate + win < (1 << 62) {
        candidate + win
    } else if candidate > expected + hwin && candidate >= win {
        candidate - win
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc_expansion_example_test() {
        //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.3
        //# if the highest successfully authenticated packet had a packet
        //# number of 0xa82f30ea, then a packet containing a 16-bit value of
        //# 0x9b32 will be decoded as 0xa82f9b32.
        assert_eq!(expand(0x9b32, 2, Some(0xa82f_30ea)), 0xa82f_9b32);
    }

    #[test]
    fn truncate_expand_round_trip_test() {
        for (pn, largest) in [
            (0u64, None),
            (1, Some(0)),
            (255, Some(254)),
            (256, Some(128)),
            (65_536, Some(65_000)),
            (0xa82f_9b32, Some(0xa82f_30ea)),
            (1 << 30, Some((1 << 30) - 100)),
        ] {
            let (truncated, len) = truncate(pn, largest);
            assert!((1..=4).contains(&len));
            assert_eq!(expand(truncated, len, largest), pn, "pn={pn} largest={largest:?}");
        }
    }

    #[test]
    fn first_packet_test() {
        let (truncated, len) = truncate(0, None);
        assert_eq!((truncated, len), (0, 1));
        assert_eq!(expand(0, 1, None), 0);
    }
}
