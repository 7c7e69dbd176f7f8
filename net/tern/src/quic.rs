// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! QUIC sockets: the engine from `tern-transport` driven over tokio UDP.
//!
//! One driver task per endpoint owns the socket and its connections;
//! stream operations arrive over a command channel and application events
//! fan out through registered callbacks. Packet protection and the
//! handshake are capability objects supplied by the host (the ring
//! provider and a TLS driver in production, deterministic ones in tests).

use crate::{
    error::{Error, ErrorKind},
    runtime::{ReactorManager, StopSignal},
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tern_core::{
    connection::Id,
    crypto::{handshake, PacketProtection},
    random,
    stream::{StreamId, StreamType},
    time::{Clock, StdClock, Timestamp},
    varint::VarInt,
};
use tern_transport::{Connection, ConnectionConfig, Event};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, oneshot},
};
use tracing::{debug, warn};

/// The process CSPRNG as the engine's random capability
pub struct ProcessRandom;

impl random::Generator for ProcessRandom {
    fn fill(&mut self, dest: &mut [u8]) {
        rand::Rng::fill(&mut rand::thread_rng(), dest);
    }
}

/// Builds packet protection for a connection; servers receive the client's
/// initial destination CID
pub type ProtectionFactory =
    Arc<dyn Fn(&Id) -> Result<Box<dyn PacketProtection>, Error> + Send + Sync>;
/// Builds a handshake driver for a connection
pub type HandshakeFactory = Arc<dyn Fn() -> Box<dyn handshake::Driver> + Send + Sync>;

/// `(peer, stream_id, payload, fin)`
pub type StreamDataCallback = Arc<dyn Fn(&str, u64, &[u8], bool) + Send + Sync>;
/// `(peer)`
pub type ConnectedCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// `(peer, error_code, reason)`
pub type ClosedCallback = Arc<dyn Fn(&str, u64, &str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct QuicCallbacks {
    pub stream_data: Option<StreamDataCallback>,
    pub connected: Option<ConnectedCallback>,
    pub closed: Option<ClosedCallback>,
}

enum Command {
    OpenStream {
        peer: Option<SocketAddr>,
        unidirectional: bool,
        reply: oneshot::Sender<Result<u64, Error>>,
    },
    SendStream {
        peer: Option<SocketAddr>,
        id: u64,
        data: Vec<u8>,
        fin: bool,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Close {
        code: u64,
        reason: String,
    },
}

fn to_error(operation: &'static str, error: tern_core::connection::Error) -> Error {
    Error::new(ErrorKind::SendFailed, operation, error.to_string())
}

fn stream_id(raw: u64) -> Result<StreamId, Error> {
    VarInt::new(raw)
        .map(StreamId::from_varint)
        .map_err(|_| Error::new(ErrorKind::InvalidArgument, "quic.stream", "stream id range"))
}

/// A QUIC client endpoint
pub struct QuicClient {
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    callbacks: Mutex<QuicCallbacks>,
    handshake_timeout: Duration,
}

impl QuicClient {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self {
            commands: Mutex::new(None),
            callbacks: Mutex::new(QuicCallbacks::default()),
            handshake_timeout,
        }
    }

    /// Registers callbacks; call before [`QuicClient::connect`]
    pub fn set_callbacks(&self, callbacks: QuicCallbacks) {
        *self.callbacks.lock().unwrap() = callbacks;
    }

    /// Connects, completing once the handshake finishes
    pub fn connect(
        &self,
        manager: &ReactorManager,
        remote: SocketAddr,
        config: ConnectionConfig,
        protection: Box<dyn PacketProtection>,
        handshake: Box<dyn handshake::Driver>,
    ) -> Result<(), Error> {
        let callbacks = self.callbacks.lock().unwrap().clone();
        let handle = manager.handle();
        let handshake_timeout = self.handshake_timeout;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = oneshot::channel();

        let connect = async {
            let socket = UdpSocket::bind(("0.0.0.0", 0))
                .await
                .map_err(|error| Error::from_bind("quic.connect", error))?;
            socket
                .connect(remote)
                .await
                .map_err(|error| Error::from_io("quic.connect", error))?;

            let mut connection =
                Connection::client(config, protection, handshake, &mut ProcessRandom);
            connection
                .start(StdClock.get_time())
                .map_err(|error| {
                    Error::new(ErrorKind::HandshakeFailed, "quic.connect", error.to_string())
                })?;
            Ok::<_, Error>((socket, connection))
        };
        let (socket, connection) = handle.block_on(connect)?;

        let label = format!("quic-client-{remote}");
        manager.register(&label, move |stop| {
            drive_client(connection, socket, command_rx, callbacks, stop, connected_tx)
        });

        *self.commands.lock().unwrap() = Some(command_tx);

        handle
            .block_on(async {
                tokio::time::timeout(handshake_timeout, connected_rx).await
            })
            .map_err(|_| {
                Error::new(
                    ErrorKind::HandshakeFailed,
                    "quic.connect",
                    "handshake deadline elapsed",
                )
            })?
            .map_err(|_| {
                Error::new(
                    ErrorKind::HandshakeFailed,
                    "quic.connect",
                    "connection closed during handshake",
                )
            })
    }

    fn command_sender(&self, operation: &'static str) -> Result<mpsc::UnboundedSender<Command>, Error> {
        self.commands
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::not_running(operation))
    }

    /// Opens a stream; bidirectional unless `unidirectional`
    pub fn create_stream(&self, manager: &ReactorManager, unidirectional: bool) -> Result<u64, Error> {
        let sender = self.command_sender("quic.create_stream")?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(Command::OpenStream {
                peer: None,
                unidirectional,
                reply: reply_tx,
            })
            .map_err(|_| Error::closed("quic.create_stream"))?;
        manager
            .handle()
            .block_on(reply_rx)
            .map_err(|_| Error::closed("quic.create_stream"))?
    }

    /// Queues stream data; `fin` closes the stream
    pub fn send_stream(
        &self,
        manager: &ReactorManager,
        id: u64,
        data: &[u8],
        fin: bool,
    ) -> Result<(), Error> {
        let sender = self.command_sender("quic.send_stream")?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(Command::SendStream {
                peer: None,
                id,
                data: data.to_vec(),
                fin,
                reply: reply_tx,
            })
            .map_err(|_| Error::closed("quic.send_stream"))?;
        manager
            .handle()
            .block_on(reply_rx)
            .map_err(|_| Error::closed("quic.send_stream"))?
    }

    /// Closes the connection with an application error
    pub fn close(&self, code: u64, reason: &str) {
        if let Ok(sender) = self.command_sender("quic.close") {
            let _ = sender.send(Command::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }
}

fn dispatch_events(connection: &mut Connection, peer: &str, callbacks: &QuicCallbacks) {
    while let Some(event) = connection.poll_event() {
        match event {
            Event::Connected => {
                if let Some(connected) = &callbacks.connected {
                    connected(peer);
                }
            }
            Event::StreamData { id, data, fin } => {
                if let Some(stream_data) = &callbacks.stream_data {
                    stream_data(peer, id.into(), &data, fin);
                }
            }
            Event::StreamReset { id, error_code } => {
                debug!(peer, stream = u64::from(id), error_code, "stream reset");
            }
            Event::Closed { error_code, reason } => {
                if let Some(closed) = &callbacks.closed {
                    closed(peer, error_code, &reason);
                }
            }
        }
    }
}

fn timeout_sleep(connection: &Connection, now: Timestamp) -> Duration {
    connection
        .next_timeout()
        .map(|deadline| deadline.saturating_duration_since(now))
        .unwrap_or(Duration::from_secs(3600))
}

async fn drive_client(
    mut connection: Connection,
    socket: UdpSocket,
    mut commands: mpsc::UnboundedReceiver<Command>,
    callbacks: QuicCallbacks,
    mut stop: StopSignal,
    connected: oneshot::Sender<()>,
) -> Result<(), Error> {
    let peer = socket
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let mut connected = Some(connected);
    let mut buf = vec![0u8; 2048];

    loop {
        let now = StdClock.get_time();

        while let Some(datagram) = connection.poll_transmit(now) {
            if let Err(error) = socket.send(&datagram).await {
                warn!(%error, "udp send failed");
            }
        }

        if connection.state().is_connected() {
            if let Some(connected) = connected.take() {
                let _ = connected.send(());
            }
        }
        dispatch_events(&mut connection, &peer, &callbacks);

        if connection.state().is_closed() {
            debug!(peer, "quic client connection closed");
            return Ok(());
        }

        let sleep = timeout_sleep(&connection, now);
        tokio::select! {
            _ = stop.stopped() => {
                let now = StdClock.get_time();
                connection.close(0, "endpoint stopped", now);
                while let Some(datagram) = connection.poll_transmit(now) {
                    let _ = socket.send(&datagram).await;
                }
                return Ok(());
            }
            received = socket.recv(&mut buf) => match received {
                Ok(len) => {
                    let _ = connection.on_datagram(&buf[..len], StdClock.get_time());
                }
                Err(error) => return Err(Error::from_io("quic.recv", error)),
            },
            command = commands.recv() => match command {
                Some(Command::OpenStream { unidirectional, reply, .. }) => {
                    let stream_type = if unidirectional {
                        StreamType::Unidirectional
                    } else {
                        StreamType::Bidirectional
                    };
                    let result = connection
                        .create_stream(stream_type)
                        .map(u64::from)
                        .map_err(|error| to_error("quic.create_stream", error));
                    let _ = reply.send(result);
                }
                Some(Command::SendStream { id, data, fin, reply, .. }) => {
                    let result = stream_id(id).and_then(|id| {
                        connection
                            .send_stream_data(id, &data, fin)
                            .map_err(|error| to_error("quic.send_stream", error))
                    });
                    let _ = reply.send(result);
                }
                Some(Command::Close { code, reason }) => {
                    connection.close(code, &reason, StdClock.get_time());
                }
                None => {
                    connection.close(0, "endpoint dropped", StdClock.get_time());
                }
            },
            _ = tokio::time::sleep(sleep) => {
                connection.on_timeout(StdClock.get_time());
            }
        }
    }
}

/// A QUIC server endpoint: one socket, one connection per peer address
pub struct QuicServer {
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    callbacks: Mutex<QuicCallbacks>,
    local_addr: Mutex<Option<SocketAddr>>,
    label: Mutex<String>,
}

impl Default for QuicServer {
    fn default() -> Self {
        Self::new()
    }
}

impl QuicServer {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(None),
            callbacks: Mutex::new(QuicCallbacks::default()),
            local_addr: Mutex::new(None),
            label: Mutex::new(String::new()),
        }
    }

    pub fn set_callbacks(&self, callbacks: QuicCallbacks) {
        *self.callbacks.lock().unwrap() = callbacks;
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    pub fn start(
        &self,
        manager: &ReactorManager,
        bind_addr: (&str, u16),
        config: ConnectionConfig,
        protection_factory: ProtectionFactory,
        handshake_factory: HandshakeFactory,
    ) -> Result<SocketAddr, Error> {
        let callbacks = self.callbacks.lock().unwrap().clone();
        let handle = manager.handle();
        let bind_host = bind_addr.0.to_string();
        let bind_port = bind_addr.1;

        let socket = handle.block_on(async move {
            UdpSocket::bind((bind_host.as_str(), bind_port))
                .await
                .map_err(|error| Error::from_bind("quic.server.start", error))
        })?;
        let local_addr = socket
            .local_addr()
            .map_err(|error| Error::from_io("quic.server.start", error))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let label = format!("quic-server-{local_addr}");

        manager.register(&label, move |stop| {
            drive_server(
                socket,
                config,
                protection_factory,
                handshake_factory,
                command_rx,
                callbacks,
                stop,
            )
        });

        *self.commands.lock().unwrap() = Some(command_tx);
        *self.local_addr.lock().unwrap() = Some(local_addr);
        *self.label.lock().unwrap() = label;
        Ok(local_addr)
    }

    /// Sends stream data to a connected peer
    pub fn send_stream(
        &self,
        manager: &ReactorManager,
        peer: SocketAddr,
        id: u64,
        data: &[u8],
        fin: bool,
    ) -> Result<(), Error> {
        let sender = self
            .commands
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::not_running("quic.server.send"))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(Command::SendStream {
                peer: Some(peer),
                id,
                data: data.to_vec(),
                fin,
                reply: reply_tx,
            })
            .map_err(|_| Error::closed("quic.server.send"))?;
        manager
            .handle()
            .block_on(reply_rx)
            .map_err(|_| Error::closed("quic.server.send"))?
    }

    pub fn stop(&self, manager: &ReactorManager) {
        let label = self.label.lock().unwrap().clone();
        if !label.is_empty() {
            manager.stop(&label);
        }
        *self.commands.lock().unwrap() = None;
    }
}

async fn drive_server(
    socket: UdpSocket,
    config: ConnectionConfig,
    protection_factory: ProtectionFactory,
    handshake_factory: HandshakeFactory,
    mut commands: mpsc::UnboundedReceiver<Command>,
    callbacks: QuicCallbacks,
    mut stop: StopSignal,
) -> Result<(), Error> {
    let mut connections: HashMap<SocketAddr, Connection> = HashMap::new();
    let mut buf = vec![0u8; 2048];

    loop {
        let now = StdClock.get_time();

        for (peer, connection) in connections.iter_mut() {
            while let Some(datagram) = connection.poll_transmit(now) {
                if let Err(error) = socket.send_to(&datagram, *peer).await {
                    warn!(%error, %peer, "udp send failed");
                }
            }
            dispatch_events(connection, &peer.to_string(), &callbacks);
        }
        connections.retain(|peer, connection| {
            let keep = !connection.state().is_closed();
            if !keep {
                debug!(%peer, "quic server connection closed");
            }
            keep
        });

        let sleep = connections
            .values()
            .map(|connection| timeout_sleep(connection, now))
            .min()
            .unwrap_or(Duration::from_secs(3600));

        tokio::select! {
            _ = stop.stopped() => {
                let now = StdClock.get_time();
                for (peer, connection) in connections.iter_mut() {
                    connection.close(0, "server stopped", now);
                    while let Some(datagram) = connection.poll_transmit(now) {
                        let _ = socket.send_to(&datagram, *peer).await;
                    }
                }
                return Ok(());
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    let datagram = &buf[..len];
                    if let Some(connection) = connections.get_mut(&peer) {
                        let _ = connection.on_datagram(datagram, StdClock.get_time());
                    } else if let Some((dcid, scid)) = Connection::peek_initial(datagram) {
                        match new_server_connection(
                            &config,
                            &protection_factory,
                            &handshake_factory,
                            &dcid,
                            scid,
                        ) {
                            Ok(mut connection) => {
                                let now = StdClock.get_time();
                                let _ = connection.start(now);
                                let _ = connection.on_datagram(datagram, now);
                                connections.insert(peer, connection);
                                debug!(%peer, "quic connection accepted");
                            }
                            Err(error) => warn!(%peer, %error, "rejecting connection"),
                        }
                    } else {
                        debug!(%peer, "non-initial datagram from unknown peer");
                    }
                }
                Err(error) => return Err(Error::from_io("quic.server.recv", error)),
            },
            command = commands.recv() => match command {
                Some(Command::SendStream { peer: Some(peer), id, data, fin, reply }) => {
                    let result = match connections.get_mut(&peer) {
                        Some(connection) => stream_id(id).and_then(|id| {
                            connection
                                .send_stream_data(id, &data, fin)
                                .map_err(|error| to_error("quic.server.send", error))
                        }),
                        None => Err(Error::closed("quic.server.send")),
                    };
                    let _ = reply.send(result);
                }
                Some(Command::OpenStream { peer: Some(peer), unidirectional, reply }) => {
                    let stream_type = if unidirectional {
                        StreamType::Unidirectional
                    } else {
                        StreamType::Bidirectional
                    };
                    let result = match connections.get_mut(&peer) {
                        Some(connection) => connection
                            .create_stream(stream_type)
                            .map(u64::from)
                            .map_err(|error| to_error("quic.server.stream", error)),
                        None => Err(Error::closed("quic.server.stream")),
                    };
                    let _ = reply.send(result);
                }
                Some(Command::Close { code, reason }) => {
                    let now = StdClock.get_time();
                    for connection in connections.values_mut() {
                        connection.close(code, &reason, now);
                    }
                }
                Some(other) => {
                    // a client-side command without a peer; nothing to route
                    drop(other);
                }
                None => return Ok(()),
            },
            _ = tokio::time::sleep(sleep) => {
                let now = StdClock.get_time();
                for connection in connections.values_mut() {
                    connection.on_timeout(now);
                }
            }
        }
    }
}

fn new_server_connection(
    config: &ConnectionConfig,
    protection_factory: &ProtectionFactory,
    handshake_factory: &HandshakeFactory,
    dcid: &Id,
    scid: Id,
) -> Result<Connection, Error> {
    let protection = protection_factory(dcid)?;
    let handshake = handshake_factory();
    Ok(Connection::server(
        config.clone(),
        protection,
        handshake,
        scid,
        &mut ProcessRandom,
    ))
}
