// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The QUIC connection state machine.
//!
//! Drive it with [`Connection::on_datagram`], [`Connection::on_timeout`],
//! and the `send_*` operations; drain it with [`Connection::poll_transmit`]
//! and [`Connection::poll_event`]. All methods take the current time so the
//! engine never reads a clock.

use crate::{
    config::ConnectionConfig,
    pending::PendingFrame,
    recovery::Recovery,
    streams::{Reassembler, StreamManager},
};
use std::collections::VecDeque;
use tern_codec::{DecoderBuffer, Encoder, EncoderBuffer, EncoderValue};
use tern_core::{
    connection::{self, Id},
    crypto::{
        handshake::{self, Output},
        PacketProtection,
    },
    endpoint,
    frame::{self, ack::AckRanges, Frame},
    packet::{self, HeaderParams},
    random,
    space::{EncryptionLevel, LevelSet, PacketNumberSpace},
    stream::{StreamId, StreamType},
    time::{Timer, Timestamp},
    transport,
    varint::VarInt,
};
use tracing::{debug, trace};

/// The synthetic application error code surfaced when the idle timer closes
/// a connection
pub const IDLE_TIMEOUT_CODE: u64 = 0x49444c45; // "IDLE"

/// Connection lifecycle states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    HandshakeStart,
    Handshake,
    Connected,
    Closing,
    Draining,
    Closed,
}

impl State {
    #[inline]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    #[inline]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// True while the connection may still send application data
    #[inline]
    pub fn is_open(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::HandshakeStart | Self::Handshake | Self::Connected
        )
    }
}

/// Application-visible connection events
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    /// The handshake completed
    Connected,
    /// Stream data arrived, in order
    StreamData {
        id: StreamId,
        data: Vec<u8>,
        fin: bool,
    },
    /// The peer abruptly terminated a stream
    StreamReset { id: StreamId, error_code: u64 },
    /// The connection ended
    Closed { error_code: u64, reason: String },
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub acks_received: u64,
}

pub struct Connection {
    config: ConnectionConfig,
    local: endpoint::Type,
    state: State,
    local_cid: Id,
    remote_cid: Id,
    spaces: LevelSet<PacketNumberSpace>,
    pending: LevelSet<VecDeque<PendingFrame>>,
    ack_ranges: LevelSet<AckRanges>,
    ack_needed: LevelSet<bool>,
    crypto_recv: LevelSet<Reassembler>,
    crypto_send_offset: LevelSet<u64>,
    protection: Box<dyn PacketProtection>,
    handshake: Box<dyn handshake::Driver>,
    streams: StreamManager,
    recovery: Recovery,
    idle_timer: Timer,
    drain_timer: Timer,
    events: VecDeque<Event>,
    handshake_complete: bool,
    handshake_confirmed: bool,
    peer_max_data: u64,
    local_max_data: u64,
    received_data: u64,
    stats: Stats,
}

impl Connection {
    /// Creates a client connection; [`Connection::start`] begins the
    /// handshake
    pub fn client<R: random::Generator>(
        config: ConnectionConfig,
        protection: Box<dyn PacketProtection>,
        handshake: Box<dyn handshake::Driver>,
        random: &mut R,
    ) -> Self {
        let local_cid = Id::generate(random);
        // the client invents the server's first connection ID
        let remote_cid = Id::generate(random);
        Self::new(config, endpoint::Type::Client, protection, handshake, local_cid, remote_cid)
    }

    /// Creates a server connection for a freshly seen client.
    ///
    /// `remote_cid` is the source connection ID of the client's Initial
    /// packet (see [`Connection::peek_initial`]).
    pub fn server<R: random::Generator>(
        config: ConnectionConfig,
        protection: Box<dyn PacketProtection>,
        handshake: Box<dyn handshake::Driver>,
        remote_cid: Id,
        random: &mut R,
    ) -> Self {
        let local_cid = Id::generate(random);
        Self::new(config, endpoint::Type::Server, protection, handshake, local_cid, remote_cid)
    }

    fn new(
        config: ConnectionConfig,
        local: endpoint::Type,
        protection: Box<dyn PacketProtection>,
        handshake: Box<dyn handshake::Driver>,
        local_cid: Id,
        remote_cid: Id,
    ) -> Self {
        let local_max_data = config.initial_max_data;
        let recovery = Recovery::new(config.initial_pto, config.max_pto);
        Self {
            config,
            local,
            state: State::Idle,
            local_cid,
            remote_cid,
            spaces: LevelSet::default(),
            pending: LevelSet::default(),
            ack_ranges: LevelSet::default(),
            ack_needed: LevelSet::default(),
            crypto_recv: LevelSet::default(),
            crypto_send_offset: LevelSet::default(),
            protection,
            handshake,
            streams: StreamManager::new(local),
            recovery,
            idle_timer: Timer::default(),
            drain_timer: Timer::default(),
            events: VecDeque::new(),
            handshake_complete: false,
            handshake_confirmed: false,
            peer_max_data: u64::MAX,
            local_max_data,
            received_data: 0,
            stats: Stats::default(),
        }
    }

    /// Extracts the connection IDs from a client's first datagram without
    /// constructing a connection. Returns `(destination, source)`.
    pub fn peek_initial(datagram: &[u8]) -> Option<(Id, Id)> {
        let (parsed, _) = packet::decode(datagram, connection::LOCAL_ID_LEN).ok()?;
        parsed
            .level
            .is_initial()
            .then_some((parsed.destination_cid, parsed.source_cid))
    }

    /// Starts the connection: clients emit their first handshake flight
    pub fn start(&mut self, now: Timestamp) -> Result<(), connection::Error> {
        debug_assert_eq!(self.state, State::Idle);
        self.transition(State::HandshakeStart);

        let outputs = self
            .handshake
            .start()
            .map_err(|error| self.on_handshake_error(error, now))?;
        self.apply_handshake_outputs(outputs, now)?;

        self.transition(State::Handshake);
        self.idle_timer.set(now + self.config.idle_timeout);
        Ok(())
    }

    /// Feeds a received datagram (one or more coalesced packets)
    pub fn on_datagram(
        &mut self,
        datagram: &[u8],
        now: Timestamp,
    ) -> Result<(), connection::Error> {
        if matches!(self.state, State::Closed | State::Draining) {
            return Ok(());
        }

        let mut remaining = datagram;
        while !remaining.is_empty() {
            let (parsed, rest) = match packet::decode(remaining, self.local_cid.len()) {
                Ok(decoded) => decoded,
                // an undecodable packet poisons the rest of the datagram
                Err(_) => break,
            };
            remaining = rest;

            let level = parsed.level;
            if !self.protection.has_level(level) {
                trace!(%level, "dropping packet without keys");
                continue;
            }

            let packet_number =
                parsed.packet_number(self.spaces.get(level).largest_received());

            if self.ack_ranges.get(level).contains(packet_number) {
                // duplicate
                continue;
            }

            let plaintext = match self.protection.open(
                level,
                packet_number,
                parsed.header,
                parsed.payload,
            ) {
                Ok(plaintext) => plaintext,
                Err(_) => {
                    trace!(%level, packet_number, "payload failed authentication");
                    continue;
                }
            };

            self.spaces.get_mut(level).on_packet_received(packet_number);
            self.stats.packets_received += 1;

            // the server's long-header replies carry its chosen connection ID
            if self.local.is_client()
                && !self.handshake_complete
                && !parsed.source_cid.is_empty()
            {
                self.remote_cid = parsed.source_cid;
            }

            self.idle_timer.set(now + self.config.idle_timeout);
            self.on_packet_payload(level, packet_number, &plaintext, now)?;

            if !self.state.is_open() {
                break;
            }
        }

        Ok(())
    }

    fn on_packet_payload(
        &mut self,
        level: EncryptionLevel,
        packet_number: u64,
        plaintext: &[u8],
        now: Timestamp,
    ) -> Result<(), connection::Error> {
        let frames = match Frame::decode_all(DecoderBuffer::new(plaintext)) {
            Ok(frames) => frames,
            Err(_) => {
                return Err(self.fatal(
                    transport::Error::FRAME_ENCODING_ERROR.with_reason("malformed frame"),
                    now,
                ))
            }
        };

        let mut is_ack_eliciting = false;
        for wire_frame in frames {
            is_ack_eliciting |= wire_frame.is_ack_eliciting();

            match wire_frame {
                Frame::Padding(_) | Frame::Ping(_) => {}
                Frame::Ack(ack) => {
                    self.stats.acks_received += 1;
                    self.spaces
                        .get_mut(level)
                        .on_packet_acked(ack.largest_acknowledged());
                    self.recovery.on_ack_received(level, &ack.ranges);
                }
                Frame::Crypto(crypto) => {
                    self.on_crypto_frame(level, &crypto, now)?;
                }
                Frame::Stream(stream) => {
                    if !level.is_application() {
                        return Err(self.fatal(
                            transport::Error::PROTOCOL_VIOLATION
                                .with_reason("stream frame outside application level"),
                            now,
                        ));
                    }
                    self.on_stream_frame(&stream, now)?;
                }
                Frame::ResetStream(reset) => {
                    let id = StreamId::from_varint(reset.stream_id);
                    if let Ok(stream) = self.streams.get_or_open(reset.stream_id) {
                        stream.reset_received = true;
                    }
                    self.events.push_back(Event::StreamReset {
                        id,
                        error_code: reset.application_error_code.as_u64(),
                    });
                }
                Frame::MaxData(max_data) => {
                    let limit = max_data.maximum_data.as_u64();
                    if limit > self.peer_max_data || self.peer_max_data == u64::MAX {
                        self.peer_max_data = limit;
                    }
                }
                Frame::MaxStreamData(max_stream_data) => {
                    let _ = max_stream_data;
                }
                Frame::ConnectionClose(close) => {
                    let error_code = close.error_code.as_u64();
                    let reason = close.reason_str().unwrap_or_default().to_string();
                    debug!(error_code, %reason, "peer closed the connection");

                    self.transition(State::Draining);
                    self.drain_timer.set(now + self.config.drain_timeout);
                    self.idle_timer.cancel();
                    self.events.push_back(Event::Closed { error_code, reason });
                }
                Frame::HandshakeDone(_) => {
                    if self.local.is_server() {
                        return Err(self.fatal(
                            transport::Error::PROTOCOL_VIOLATION
                                .with_reason("client sent HANDSHAKE_DONE"),
                            now,
                        ));
                    }
                    self.handshake_confirmed = true;
                    self.recovery.discard_level(EncryptionLevel::Initial);
                    self.recovery.discard_level(EncryptionLevel::Handshake);
                }
            }
        }

        self.ack_ranges.get_mut(level).insert(packet_number);
        *self.ack_needed.get_mut(level) |= is_ack_eliciting;

        Ok(())
    }

    fn on_crypto_frame(
        &mut self,
        level: EncryptionLevel,
        crypto: &frame::Crypto<'_>,
        now: Timestamp,
    ) -> Result<(), connection::Error> {
        if self.state == State::HandshakeStart {
            self.transition(State::Handshake);
        }

        self.crypto_recv
            .get_mut(level)
            .insert(crypto.offset.as_u64(), crypto.data, false)
            .map_err(|error| self.fatal(error, now))?;

        while let Some((chunk, _)) = self.crypto_recv.get_mut(level).pop() {
            let outputs = match self.handshake.on_crypto(level, &chunk) {
                Ok(outputs) => outputs,
                Err(error) => return Err(self.on_handshake_error(error, now)),
            };
            self.apply_handshake_outputs(outputs, now)?;
        }

        Ok(())
    }

    fn apply_handshake_outputs(
        &mut self,
        outputs: Vec<Output>,
        now: Timestamp,
    ) -> Result<(), connection::Error> {
        for output in outputs {
            match output {
                Output::Crypto { level, data } => {
                    let len = data.len() as u64;
                    let offset = self.crypto_send_offset.get_mut(level);
                    let frame = PendingFrame::Crypto {
                        offset: *offset,
                        data,
                    };
                    *offset += len;
                    self.pending.get_mut(level).push_back(frame);
                }
                Output::Secrets {
                    level,
                    read_secret,
                    write_secret,
                } => {
                    self.protection
                        .install_secrets(level, &read_secret, &write_secret)
                        .map_err(|_| {
                            self.fatal(
                                transport::Error::INTERNAL_ERROR
                                    .with_reason("failed to install traffic secrets"),
                                now,
                            )
                        })?;
                }
                Output::Complete => self.on_handshake_complete(),
            }
        }
        Ok(())
    }

    fn on_handshake_complete(&mut self) {
        if self.handshake_complete {
            return;
        }
        self.handshake_complete = true;
        self.transition(State::Connected);
        self.events.push_back(Event::Connected);

        if self.local.is_server() {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.20
            //# The server MUST NOT send a HANDSHAKE_DONE frame before
            //# completing the handshake.
            self.pending
                .get_mut(EncryptionLevel::Application)
                .push_back(PendingFrame::HandshakeDone);
            self.handshake_confirmed = true;
            self.recovery.discard_level(EncryptionLevel::Initial);
        }
    }

    fn on_handshake_error(&mut self, error: handshake::Error, now: Timestamp) -> connection::Error {
        let transport_error = match error {
            handshake::Error::Protocol(error) => error,
            handshake::Error::Rejected(reason) => {
                // 0x0100 is the base of the TLS alert range
                transport::Error::new(VarInt::from_u16(0x0100)).with_reason(reason)
            }
        };
        let _ = self.fatal(transport_error, now);
        connection::Error::HandshakeFailed {
            reason: transport_error.reason,
        }
    }

    fn on_stream_frame(
        &mut self,
        stream_frame: &frame::Stream<'_>,
        now: Timestamp,
    ) -> Result<(), connection::Error> {
        let id = StreamId::from_varint(stream_frame.stream_id);

        struct Delivery {
            chunks: Vec<(Vec<u8>, bool)>,
            surface_fin: bool,
            reset: bool,
        }

        let streams = &mut self.streams;
        let outcome = (|| -> Result<Delivery, transport::Error> {
            let stream = streams.get_or_open(stream_frame.stream_id)?;
            if stream.reset_received {
                return Ok(Delivery {
                    chunks: Vec::new(),
                    surface_fin: false,
                    reset: true,
                });
            }

            stream.receive.insert(
                stream_frame.offset.as_u64(),
                stream_frame.data,
                stream_frame.is_fin,
            )?;

            let mut chunks = Vec::new();
            let mut delivered_fin = false;
            while let Some((chunk, fin)) = stream.receive.pop() {
                delivered_fin |= fin;
                chunks.push((chunk, fin));
            }

            let mut surface_fin = false;
            if stream.receive.is_finished() && !stream.fin_delivered {
                stream.fin_delivered = true;
                surface_fin = !delivered_fin;
            }

            Ok(Delivery {
                chunks,
                surface_fin,
                reset: false,
            })
        })();

        let delivery = match outcome {
            Ok(delivery) => delivery,
            Err(error) => return Err(self.fatal(error, now)),
        };
        if delivery.reset {
            return Ok(());
        }
        let (delivered, surface_fin) = (delivery.chunks, delivery.surface_fin);

        for (chunk, fin) in delivered {
            self.received_data += chunk.len() as u64;
            self.events.push_back(Event::StreamData {
                id,
                data: chunk,
                fin,
            });
        }
        if surface_fin {
            self.events.push_back(Event::StreamData {
                id,
                data: Vec::new(),
                fin: true,
            });
        }

        // replenish connection-level flow control before the peer stalls
        if self.received_data * 2 > self.local_max_data {
            self.local_max_data = self.local_max_data.saturating_mul(2);
            self.pending
                .get_mut(EncryptionLevel::Application)
                .push_back(PendingFrame::MaxData {
                    maximum_data: self.local_max_data,
                });
        }

        Ok(())
    }

    /// Opens a locally initiated stream
    pub fn create_stream(&mut self, stream_type: StreamType) -> Result<StreamId, connection::Error> {
        if !self.state.is_open() {
            return Err(connection::Error::Closed {
                initiator: endpoint::Location::Local,
            });
        }
        self.streams.create(stream_type).map_err(|error| {
            if error.code == transport::Error::STREAM_LIMIT_ERROR.code {
                connection::Error::StreamIdExhausted
            } else {
                error.into()
            }
        })
    }

    /// Queues stream data; `fin` closes the send direction
    pub fn send_stream_data(
        &mut self,
        id: StreamId,
        data: &[u8],
        fin: bool,
    ) -> Result<(), connection::Error> {
        if !self.state.is_open() {
            return Err(connection::Error::Closed {
                initiator: endpoint::Location::Local,
            });
        }

        let stream = self
            .streams
            .get_mut(id)
            .ok_or(connection::Error::Transport {
                error: transport::Error::STREAM_STATE_ERROR.with_reason("unknown stream"),
                initiator: endpoint::Location::Local,
            })?;

        if stream.fin_sent || stream.reset_sent {
            return Err(connection::Error::Transport {
                error: transport::Error::FINAL_SIZE_ERROR
                    .with_reason("stream send side already closed"),
                initiator: endpoint::Location::Local,
            });
        }

        let offset = stream.send_offset;
        stream.send_offset += data.len() as u64;
        stream.fin_sent |= fin;

        self.pending
            .get_mut(EncryptionLevel::Application)
            .push_back(PendingFrame::Stream {
                id: id.into(),
                offset,
                data: data.to_vec(),
                fin,
            });
        Ok(())
    }

    /// Gracefully closes the send direction of a stream
    pub fn close_stream(&mut self, id: StreamId) -> Result<(), connection::Error> {
        self.send_stream_data(id, &[], true)
    }

    /// Abruptly terminates the send direction of a stream
    pub fn reset_stream(&mut self, id: StreamId, error_code: u64) -> Result<(), connection::Error> {
        let stream = self
            .streams
            .get_mut(id)
            .ok_or(connection::Error::Transport {
                error: transport::Error::STREAM_STATE_ERROR.with_reason("unknown stream"),
                initiator: endpoint::Location::Local,
            })?;
        if stream.reset_sent {
            return Ok(());
        }
        stream.reset_sent = true;
        let final_size = stream.send_offset;

        self.pending
            .get_mut(EncryptionLevel::Application)
            .push_back(PendingFrame::ResetStream {
                id: id.into(),
                error_code,
                final_size,
            });
        Ok(())
    }

    /// Closes the connection with an application error
    pub fn close(&mut self, error_code: u64, reason: &str, now: Timestamp) {
        if !self.state.is_open() {
            return;
        }

        let level = if self.protection.has_level(EncryptionLevel::Application) {
            EncryptionLevel::Application
        } else {
            EncryptionLevel::Initial
        };

        self.pending
            .get_mut(level)
            .push_back(PendingFrame::ConnectionClose {
                error_code,
                frame_type: None,
                reason: reason.as_bytes().to_vec(),
            });

        self.transition(State::Closing);
        self.drain_timer.set(now + self.config.drain_timeout);
        self.idle_timer.cancel();
        self.events.push_back(Event::Closed {
            error_code,
            reason: reason.to_string(),
        });
    }

    /// Queues a CONNECTION_CLOSE for a fatal transport error and returns
    /// the matching connection error
    fn fatal(&mut self, error: transport::Error, now: Timestamp) -> connection::Error {
        if self.state.is_open() {
            let level = if self.protection.has_level(EncryptionLevel::Application) {
                EncryptionLevel::Application
            } else {
                EncryptionLevel::Initial
            };
            self.pending
                .get_mut(level)
                .push_back(PendingFrame::ConnectionClose {
                    error_code: error.code.as_u64(),
                    frame_type: Some(0),
                    reason: error.reason.as_bytes().to_vec(),
                });
            self.transition(State::Closing);
            self.drain_timer.set(now + self.config.drain_timeout);
            self.idle_timer.cancel();
            self.events.push_back(Event::Closed {
                error_code: error.code.as_u64(),
                reason: error.reason.to_string(),
            });
        }

        connection::Error::Transport {
            error,
            initiator: endpoint::Location::Local,
        }
    }

    /// Builds the next outgoing datagram, or `None` when nothing is due
    pub fn poll_transmit(&mut self, now: Timestamp) -> Option<Vec<u8>> {
        if matches!(self.state, State::Closed | State::Draining) {
            return None;
        }

        let mut datagram = Vec::new();

        for level in [
            EncryptionLevel::Initial,
            EncryptionLevel::Handshake,
            EncryptionLevel::Application,
        ] {
            let budget = self.config.max_datagram_size.saturating_sub(datagram.len());
            if budget < 64 {
                break;
            }
            if let Some(packet) = self.build_packet(level, budget, now) {
                datagram.extend_from_slice(&packet);
            }
        }

        if datagram.is_empty() {
            return None;
        }

        if self.state.is_open() {
            self.idle_timer.set(now + self.config.idle_timeout);
        }
        Some(datagram)
    }

    fn build_packet(
        &mut self,
        level: EncryptionLevel,
        budget: usize,
        now: Timestamp,
    ) -> Option<Vec<u8>> {
        if !self.protection.has_level(level) {
            return None;
        }
        if self.pending.get(level).is_empty() && !*self.ack_needed.get(level) {
            return None;
        }

        let tag_len = self.protection.tag_len();
        // generous bound: flags + version + both length-prefixed CIDs +
        // token length + length field + packet number
        let header_overhead = 12 + self.remote_cid.len() + self.local_cid.len();
        let payload_budget = budget.checked_sub(header_overhead + tag_len)?;

        let mut plaintext = vec![0u8; payload_budget];
        let mut encoder = EncoderBuffer::new(&mut plaintext);
        let mut sent_frames: smallvec::SmallVec<[PendingFrame; 8]> = smallvec::SmallVec::new();

        if *self.ack_needed.get(level) {
            let ack = Frame::Ack(frame::Ack::from_ranges(
                self.ack_ranges.get(level).clone(),
                VarInt::ZERO,
            ));
            if ack.encoding_size() <= encoder.remaining_capacity() {
                encoder.encode(&ack);
                *self.ack_needed.get_mut(level) = false;
            }
        }

        while let Some(next) = self.pending.get(level).front() {
            let size = next.encoding_size();
            if size <= encoder.remaining_capacity() {
                let frame = self
                    .pending
                    .get_mut(level)
                    .pop_front()
                    .expect("front was just observed");
                encoder.encode(&frame);
                sent_frames.push(frame);
                continue;
            }

            // split large stream/crypto frames across packets
            let capacity = encoder.remaining_capacity();
            if capacity > 64 {
                let frame = self
                    .pending
                    .get_mut(level)
                    .pop_front()
                    .expect("front was just observed");
                match split_frame(frame, capacity - 32) {
                    (head, Some(tail)) => {
                        encoder.encode(&head);
                        sent_frames.push(head);
                        self.pending.get_mut(level).push_front(tail);
                    }
                    (head, None) => {
                        // could not split; put it back for the next packet
                        self.pending.get_mut(level).push_front(head);
                    }
                }
            }
            break;
        }

        if encoder.is_empty() {
            return None;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
        //# A client MUST expand the payload of all UDP datagrams carrying
        //# Initial packets to at least the smallest allowed maximum datagram
        //# size of 1200 bytes.
        if self.local.is_client() && level.is_initial() {
            let padding = encoder.remaining_capacity();
            encoder.write_repeated(padding, 0);
        }

        let payload_len = encoder.len();
        plaintext.truncate(payload_len);

        let packet_number = self.spaces.get_mut(level).next_packet_number().as_u64();
        let largest_acked = self.spaces.get(level).largest_acked();

        let mut header = vec![0u8; 64 + self.remote_cid.len() + self.local_cid.len()];
        let header_len = {
            let mut encoder = EncoderBuffer::new(&mut header);
            packet::encode_header(
                &HeaderParams {
                    level,
                    destination_cid: &self.remote_cid,
                    source_cid: &self.local_cid,
                    token: &[],
                    packet_number,
                    largest_acked,
                    payload_len: payload_len + tag_len,
                },
                &mut encoder,
            );
            encoder.len()
        };
        header.truncate(header_len);

        let sealed = self
            .protection
            .seal(level, packet_number, &header, &plaintext)
            .ok()?;

        self.recovery
            .on_packet_sent(level, packet_number, sent_frames.into_vec(), now);
        self.stats.packets_sent += 1;
        trace!(%level, packet_number, len = header.len() + sealed.len(), "packet sent");

        let mut out = header;
        out.extend_from_slice(&sealed);
        Some(out)
    }

    /// The next deadline that requires [`Connection::on_timeout`]
    pub fn next_timeout(&self) -> Option<Timestamp> {
        [
            self.idle_timer.expiration(),
            self.drain_timer.expiration(),
            self.recovery.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Fires expired timers: idle close, drain completion, and
    /// retransmission
    pub fn on_timeout(&mut self, now: Timestamp) {
        if self.drain_timer.poll_expiration(now).is_ready() {
            self.transition(State::Closed);
        }

        if self.idle_timer.poll_expiration(now).is_ready() && self.state.is_open() {
            debug!("idle timeout expired");
            self.transition(State::Closed);
            self.events.push_back(Event::Closed {
                error_code: IDLE_TIMEOUT_CODE,
                reason: "idle timeout".to_string(),
            });
        }

        if let Some(lost) = self.recovery.on_timeout(now) {
            for (level, frames) in lost {
                let queue = self.pending.get_mut(level);
                for frame in frames.into_iter().rev() {
                    queue.push_front(frame);
                }
            }
        }
    }

    /// Pops the next application event
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn local_cid(&self) -> &Id {
        &self.local_cid
    }

    pub fn remote_cid(&self) -> &Id {
        &self.remote_cid
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn is_handshake_confirmed(&self) -> bool {
        self.handshake_confirmed
    }

    /// Whether the peer accepted 0-RTT; surfaced for hosts, the engine
    /// never sends EarlyData itself
    pub fn is_early_data_accepted(&self) -> bool {
        self.handshake.is_early_data_accepted()
    }

    fn transition(&mut self, next: State) {
        if self.state == next {
            return;
        }
        debug!(prev = ?self.state, ?next, "connection state");
        self.state = next;
    }
}

/// Splits a Stream or Crypto frame so the head fits in `max_data` payload
/// bytes; other frames cannot be split
fn split_frame(frame: PendingFrame, max_data: usize) -> (PendingFrame, Option<PendingFrame>) {
    match frame {
        PendingFrame::Stream {
            id,
            offset,
            data,
            fin,
        } if data.len() > max_data && max_data > 0 => {
            let tail = data[max_data..].to_vec();
            let head = data[..max_data].to_vec();
            (
                PendingFrame::Stream {
                    id,
                    offset,
                    data: head,
                    fin: false,
                },
                Some(PendingFrame::Stream {
                    id,
                    offset: offset + max_data as u64,
                    data: tail,
                    fin,
                }),
            )
        }
        PendingFrame::Crypto { offset, data } if data.len() > max_data && max_data > 0 => {
            let tail = data[max_data..].to_vec();
            let head = data[..max_data].to_vec();
            (
                PendingFrame::Crypto { offset, data: head },
                Some(PendingFrame::Crypto {
                    offset: offset + max_data as u64,
                    data: tail,
                }),
            )
        }
        other => (other, None),
    }
}
