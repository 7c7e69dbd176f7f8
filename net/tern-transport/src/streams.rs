// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stream bookkeeping: ID allocation, receive-side reassembly, and
//! send-side state.

use hashbrown::HashMap;
use std::collections::BTreeMap;
use tern_core::{
    endpoint,
    stream::{StreamId, StreamType},
    transport,
    varint::VarInt,
};

/// Reorders out-of-order data back into a contiguous byte stream.
///
/// Also used for CRYPTO data, which forms a stream per encryption level.
#[derive(Debug, Default)]
pub struct Reassembler {
    delivered: u64,
    pending: BTreeMap<u64, Vec<u8>>,
    fin_offset: Option<u64>,
}

impl Reassembler {
    /// Inserts a chunk at `offset`; `fin` marks the end of the stream after
    /// this chunk
    pub fn insert(
        &mut self,
        offset: u64,
        data: &[u8],
        fin: bool,
    ) -> Result<(), transport::Error> {
        let end = offset + data.len() as u64;

        if let Some(fin_offset) = self.fin_offset {
            if end > fin_offset || (fin && end != fin_offset) {
                return Err(transport::Error::FINAL_SIZE_ERROR);
            }
        }
        if fin {
            if end < self.delivered {
                return Err(transport::Error::FINAL_SIZE_ERROR);
            }
            self.fin_offset = Some(end);
        }

        if end <= self.delivered {
            return Ok(());
        }

        // trim the already-delivered prefix
        let skip = self.delivered.saturating_sub(offset) as usize;
        let offset = offset.max(self.delivered);
        let data = &data[skip.min(data.len())..];

        self.pending
            .entry(offset)
            .and_modify(|existing| {
                if existing.len() < data.len() {
                    *existing = data.to_vec();
                }
            })
            .or_insert_with(|| data.to_vec());
        Ok(())
    }

    /// Pops the next contiguous chunk, if any. The `bool` marks the end of
    /// the stream.
    pub fn pop(&mut self) -> Option<(Vec<u8>, bool)> {
        loop {
            let (&offset, data) = self.pending.iter().next()?;
            if offset > self.delivered {
                return None;
            }
            if offset + data.len() as u64 <= self.delivered {
                // a wholly duplicate chunk
                self.pending.pop_first();
                continue;
            }

            let (offset, data) = self.pending.pop_first()?;
            let skip = (self.delivered - offset) as usize;
            self.delivered = offset + data.len() as u64;

            let chunk = if skip == 0 { data } else { data[skip..].to_vec() };
            let fin = self.fin_offset == Some(self.delivered);
            return Some((chunk, fin));
        }
    }

    /// True once a FIN has been delivered
    pub fn is_finished(&self) -> bool {
        self.fin_offset == Some(self.delivered)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

#[derive(Debug, Default)]
pub struct StreamState {
    pub receive: Reassembler,
    /// The next send offset
    pub send_offset: u64,
    pub fin_sent: bool,
    /// The receive-side FIN has been surfaced to the application
    pub fin_delivered: bool,
    pub reset_sent: bool,
    pub reset_received: bool,
}

/// Per-connection stream table
#[derive(Debug)]
pub struct StreamManager {
    local: endpoint::Type,
    next_bidirectional: Option<StreamId>,
    next_unidirectional: Option<StreamId>,
    streams: HashMap<u64, StreamState>,
}

impl StreamManager {
    pub fn new(local: endpoint::Type) -> Self {
        Self {
            local,
            next_bidirectional: Some(StreamId::initial(local, StreamType::Bidirectional)),
            next_unidirectional: Some(StreamId::initial(local, StreamType::Unidirectional)),
            streams: HashMap::new(),
        }
    }

    /// Allocates the next locally initiated stream ID
    pub fn create(&mut self, stream_type: StreamType) -> Result<StreamId, transport::Error> {
        let next = match stream_type {
            StreamType::Bidirectional => &mut self.next_bidirectional,
            StreamType::Unidirectional => &mut self.next_unidirectional,
        };

        let id = next.ok_or(
            transport::Error::STREAM_LIMIT_ERROR.with_reason("stream ids exhausted"),
        )?;
        *next = id.next_of_type();
        self.streams.insert(id.into(), StreamState::default());
        Ok(id)
    }

    /// Looks up a stream for received data, implicitly opening
    /// peer-initiated streams
    pub fn get_or_open(
        &mut self,
        id: VarInt,
    ) -> Result<&mut StreamState, transport::Error> {
        let stream_id = StreamId::from_varint(id);
        let key: u64 = stream_id.into();

        if !self.streams.contains_key(&key) {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
            //# A stream ID that is used out of order results in all streams
            //# of that type with lower-numbered stream IDs also being opened.
            if !stream_id.is_peer_initiated(self.local) {
                return Err(transport::Error::STREAM_STATE_ERROR
                    .with_reason("data received for an unopened local stream"));
            }
            self.streams.insert(key, StreamState::default());
        }

        Ok(self.streams.get_mut(&key).expect("stream was just ensured"))
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut StreamState> {
        self.streams.get_mut(&u64::from(id))
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.streams.contains_key(&u64::from(id))
    }

    /// Drops streams that have fully finished in both directions
    pub fn reap_finished(&mut self) {
        self.streams.retain(|_, state| {
            !(state.receive.is_finished() && (state.fin_sent || state.reset_sent))
        });
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembler_in_order_test() {
        let mut reassembler = Reassembler::default();
        reassembler.insert(0, b"hello ", false).unwrap();
        reassembler.insert(6, b"world", true).unwrap();

        assert_eq!(reassembler.pop(), Some((b"hello ".to_vec(), false)));
        assert_eq!(reassembler.pop(), Some((b"world".to_vec(), true)));
        assert_eq!(reassembler.pop(), None);
        assert!(reassembler.is_finished());
    }

    #[test]
    fn reassembler_out_of_order_test() {
        let mut reassembler = Reassembler::default();
        reassembler.insert(6, b"world", true).unwrap();
        // the gap holds delivery back
        assert_eq!(reassembler.pop(), None);

        reassembler.insert(0, b"hello ", false).unwrap();
        assert_eq!(reassembler.pop(), Some((b"hello ".to_vec(), false)));
        assert_eq!(reassembler.pop(), Some((b"world".to_vec(), true)));
    }

    #[test]
    fn reassembler_duplicate_test() {
        let mut reassembler = Reassembler::default();
        reassembler.insert(0, b"data", false).unwrap();
        assert_eq!(reassembler.pop(), Some((b"data".to_vec(), false)));

        // retransmissions of delivered data are ignored
        reassembler.insert(0, b"data", false).unwrap();
        assert_eq!(reassembler.pop(), None);
    }

    #[test]
    fn reassembler_final_size_violation_test() {
        let mut reassembler = Reassembler::default();
        reassembler.insert(0, b"1234", true).unwrap();
        assert!(reassembler.insert(2, b"56789", false).is_err());
    }

    #[test]
    fn create_allocates_spaced_ids_test() {
        let mut manager = StreamManager::new(endpoint::Type::Client);

        let first = manager.create(StreamType::Bidirectional).unwrap();
        let second = manager.create(StreamType::Bidirectional).unwrap();
        let unidirectional = manager.create(StreamType::Unidirectional).unwrap();

        assert_eq!(u64::from(first), 0);
        assert_eq!(u64::from(second), 4);
        assert_eq!(u64::from(unidirectional), 2);
    }

    #[test]
    fn implicit_peer_open_test() {
        let mut manager = StreamManager::new(endpoint::Type::Server);

        // client-initiated bidirectional stream 0 opens implicitly
        assert!(manager.get_or_open(VarInt::from_u8(0)).is_ok());
        assert_eq!(manager.len(), 1);

        // data for an unopened server-initiated stream is a protocol error
        assert!(manager.get_or_open(VarInt::from_u8(1)).is_err());
    }
}
