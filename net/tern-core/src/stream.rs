// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Types and utilities around the QUIC Stream identifier

use crate::{endpoint, varint::VarInt};

/// The type of a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamType {
    Bidirectional,
    Unidirectional,
}

impl StreamType {
    #[inline]
    pub fn is_bidirectional(self) -> bool {
        matches!(self, Self::Bidirectional)
    }

    #[inline]
    pub fn is_unidirectional(self) -> bool {
        matches!(self, Self::Unidirectional)
    }
}

/// The ID of a stream.
///
/// A stream ID is a 62-bit integer that is unique for all streams on a
/// connection.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
pub struct StreamId(VarInt);

impl From<StreamId> for VarInt {
    #[inline]
    fn from(id: StreamId) -> Self {
        id.0
    }
}

impl From<StreamId> for u64 {
    #[inline]
    fn from(id: StreamId) -> Self {
        id.0.as_u64()
    }
}

impl StreamId {
    /// Creates a Stream ID from a [`VarInt`]. Always safe, since Stream IDs
    /// and [`VarInt`]s share the same range.
    #[inline]
    pub const fn from_varint(id: VarInt) -> StreamId {
        StreamId(id)
    }

    #[inline]
    pub const fn as_varint(self) -> VarInt {
        self.0
    }

    /// Returns the initial Stream ID for a given initiator and stream type
    ///
    /// E.g. the initial server initiated unidirectional Stream ID is `3`.
    #[inline]
    pub fn initial(initiator: endpoint::Type, stream_type: StreamType) -> StreamId {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
        //# The two least significant bits from a stream ID therefore identify a
        //# stream as one of four types, as summarized in Table 1.
        match (stream_type, initiator) {
            (StreamType::Bidirectional, endpoint::Type::Client) => StreamId(VarInt::from_u8(0)),
            (StreamType::Bidirectional, endpoint::Type::Server) => StreamId(VarInt::from_u8(1)),
            (StreamType::Unidirectional, endpoint::Type::Client) => StreamId(VarInt::from_u8(2)),
            (StreamType::Unidirectional, endpoint::Type::Server) => StreamId(VarInt::from_u8(3)),
        }
    }

    /// Returns the n-th Stream ID for a certain initiator and type.
    ///
    /// The 0th Stream ID is the one returned by [`Self::initial`]; all
    /// further IDs of a given kind are spaced apart by 4. Returns `None` if
    /// the resulting ID would be out of bounds.
    #[inline]
    pub fn nth(initiator: endpoint::Type, stream_type: StreamType, n: u64) -> Option<StreamId> {
        let initial = Self::initial(initiator, stream_type);
        let id = VarInt::new(n.checked_mul(4)?.checked_add(initial.into())?).ok()?;
        Some(StreamId(id))
    }

    /// Returns the next Stream ID of the same initiator and type, or `None`
    /// when the ID space is exhausted
    #[inline]
    pub fn next_of_type(self) -> Option<StreamId> {
        self.0
            .checked_add(VarInt::from_u8(4))
            .map(StreamId::from_varint)
    }

    /// Returns whether the client or server initiated the stream
    #[inline]
    pub fn initiator(self) -> endpoint::Type {
        if self.0.as_u64() & 0x01 == 0 {
            endpoint::Type::Client
        } else {
            endpoint::Type::Server
        }
    }

    /// Returns whether the stream is unidirectional or bidirectional
    #[inline]
    pub fn stream_type(self) -> StreamType {
        if self.0.as_u64() & 0x02 == 0 {
            StreamType::Bidirectional
        } else {
            StreamType::Unidirectional
        }
    }

    /// Returns true if the peer of `local_endpoint` initiated the stream
    #[inline]
    pub fn is_peer_initiated(self, local_endpoint: endpoint::Type) -> bool {
        self.initiator() != local_endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Type;

    #[test]
    fn initial_ids_test() {
        assert_eq!(
            u64::from(StreamId::initial(Type::Client, StreamType::Bidirectional)),
            0
        );
        assert_eq!(
            u64::from(StreamId::initial(Type::Server, StreamType::Bidirectional)),
            1
        );
        assert_eq!(
            u64::from(StreamId::initial(Type::Client, StreamType::Unidirectional)),
            2
        );
        assert_eq!(
            u64::from(StreamId::initial(Type::Server, StreamType::Unidirectional)),
            3
        );
    }

    #[test]
    fn nth_and_next_test() {
        let id = StreamId::nth(Type::Client, StreamType::Bidirectional, 3).unwrap();
        assert_eq!(u64::from(id), 12);
        assert_eq!(u64::from(id.next_of_type().unwrap()), 16);
        assert_eq!(id.initiator(), Type::Client);
        assert_eq!(id.stream_type(), StreamType::Bidirectional);
    }

    #[test]
    fn direction_decoding_test() {
        for raw in 0u8..8 {
            let id = StreamId::from_varint(VarInt::from_u8(raw));
            assert_eq!(id.initiator().is_client(), raw & 0x01 == 0);
            assert_eq!(id.stream_type().is_bidirectional(), raw & 0x02 == 0);
        }
    }
}
