// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Secure datagram transport: the DTLS engines from `tern-tls` pumped
//! over tokio UDP sockets.
//!
//! The engine stays sans-IO; a driver task owns the socket, feeds
//! ciphertext datagrams in, flushes the flights the engine produces, and
//! delivers decrypted payloads to the receive callback. Servers key one
//! engine per peer address.

use crate::{
    error::{Error, ErrorKind},
    runtime::{ReactorManager, StopSignal},
};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tern_tls::{dtls, DtlsEngine, DtlsServerSessions};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, oneshot},
};
use tracing::{debug, warn};

/// `(peer, plaintext)`
pub type DatagramCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

enum Command {
    Send {
        peer: Option<SocketAddr>,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
}

/// A DTLS client over a connected UDP socket
pub struct DtlsClient {
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    receive: Mutex<Option<DatagramCallback>>,
    handshake_timeout: Duration,
}

impl DtlsClient {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self {
            commands: Mutex::new(None),
            receive: Mutex::new(None),
            handshake_timeout,
        }
    }

    pub fn set_receive_callback(&self, callback: impl Fn(&str, &[u8]) + Send + Sync + 'static) {
        *self.receive.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Connects and completes the DTLS handshake under the deadline
    pub fn connect(
        &self,
        manager: &ReactorManager,
        remote: SocketAddr,
        verify_peer: bool,
        root_pem: Option<&[u8]>,
    ) -> Result<(), Error> {
        let context = dtls::client_context(verify_peer, root_pem)?;
        let mut engine = DtlsEngine::client(&context)?;
        engine.start()?;

        let receive = self.receive.lock().unwrap().clone();
        let handle = manager.handle();

        let socket = handle.block_on(async {
            let socket = UdpSocket::bind(("0.0.0.0", 0))
                .await
                .map_err(|error| Error::from_bind("dtls.connect", error))?;
            socket
                .connect(remote)
                .await
                .map_err(|error| Error::from_io("dtls.connect", error))?;
            Ok::<_, Error>(socket)
        })?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (established_tx, established_rx) = oneshot::channel();

        let label = format!("dtls-client-{remote}");
        manager.register(&label, move |stop| {
            drive_client(engine, socket, command_rx, receive, stop, established_tx)
        });
        *self.commands.lock().unwrap() = Some(command_tx);

        handle
            .block_on(async {
                tokio::time::timeout(self.handshake_timeout, established_rx).await
            })
            .map_err(|_| {
                Error::new(
                    ErrorKind::HandshakeFailed,
                    "dtls.connect",
                    "handshake deadline elapsed",
                )
            })?
            .map_err(|_| {
                Error::new(
                    ErrorKind::HandshakeFailed,
                    "dtls.connect",
                    "connection closed during handshake",
                )
            })
    }

    /// Encrypts and sends one payload
    pub fn send(&self, manager: &ReactorManager, payload: &[u8]) -> Result<(), Error> {
        let sender = self
            .commands
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::not_running("dtls.send"))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(Command::Send {
                peer: None,
                payload: payload.to_vec(),
                reply: reply_tx,
            })
            .map_err(|_| Error::closed("dtls.send"))?;
        manager
            .handle()
            .block_on(reply_rx)
            .map_err(|_| Error::closed("dtls.send"))?
    }
}

async fn flush(engine: &mut DtlsEngine, socket: &UdpSocket) {
    for datagram in engine.take_outgoing() {
        if let Err(error) = socket.send(&datagram).await {
            warn!(%error, "dtls udp send failed");
        }
    }
}

async fn drive_client(
    mut engine: DtlsEngine,
    socket: UdpSocket,
    mut commands: mpsc::UnboundedReceiver<Command>,
    receive: Option<DatagramCallback>,
    mut stop: StopSignal,
    established: oneshot::Sender<()>,
) -> Result<(), Error> {
    let peer = socket
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let mut established = Some(established);
    let mut buf = vec![0u8; 64 * 1024];

    flush(&mut engine, &socket).await;

    loop {
        if engine.is_established() {
            if let Some(established) = established.take() {
                let _ = established.send(());
            }
        }

        tokio::select! {
            _ = stop.stopped() => {
                engine.close();
                flush(&mut engine, &socket).await;
                return Ok(());
            }
            received = socket.recv(&mut buf) => match received {
                Ok(len) => {
                    match engine.on_datagram(&buf[..len]) {
                        Ok(plaintexts) => {
                            if let Some(receive) = &receive {
                                for plaintext in &plaintexts {
                                    receive(&peer, plaintext);
                                }
                            }
                        }
                        Err(error) => {
                            warn!(%error, "dtls engine failure");
                            return Err(error.into());
                        }
                    }
                    flush(&mut engine, &socket).await;
                }
                Err(error) => return Err(Error::from_io("dtls.recv", error)),
            },
            command = commands.recv() => match command {
                Some(Command::Send { payload, reply, .. }) => {
                    let result = engine
                        .send(&payload)
                        .map_err(Error::from);
                    flush(&mut engine, &socket).await;
                    let _ = reply.send(result);
                }
                None => {
                    engine.close();
                    flush(&mut engine, &socket).await;
                    return Ok(());
                }
            },
        }
    }
}

/// A DTLS server: one engine per peer address on a shared socket
pub struct DtlsServer {
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    receive: Mutex<Option<DatagramCallback>>,
    local_addr: Mutex<Option<SocketAddr>>,
    label: Mutex<String>,
}

impl Default for DtlsServer {
    fn default() -> Self {
        Self::new()
    }
}

impl DtlsServer {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(None),
            receive: Mutex::new(None),
            local_addr: Mutex::new(None),
            label: Mutex::new(String::new()),
        }
    }

    pub fn set_receive_callback(&self, callback: impl Fn(&str, &[u8]) + Send + Sync + 'static) {
        *self.receive.lock().unwrap() = Some(Arc::new(callback));
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    pub fn start(
        &self,
        manager: &ReactorManager,
        port: u16,
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<SocketAddr, Error> {
        let context = dtls::server_context(cert_pem, key_pem)?;
        let sessions = DtlsServerSessions::new(context);
        let receive = self.receive.lock().unwrap().clone();
        let handle = manager.handle();

        let socket = handle.block_on(async move {
            UdpSocket::bind(("0.0.0.0", port))
                .await
                .map_err(|error| Error::from_bind("dtls.server.start", error))
        })?;
        let local_addr = socket
            .local_addr()
            .map_err(|error| Error::from_io("dtls.server.start", error))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let label = format!("dtls-server-{local_addr}");
        manager.register(&label, move |stop| {
            drive_server(sessions, socket, command_rx, receive, stop)
        });

        *self.commands.lock().unwrap() = Some(command_tx);
        *self.local_addr.lock().unwrap() = Some(local_addr);
        *self.label.lock().unwrap() = label;
        Ok(local_addr)
    }

    /// Encrypts and sends one payload to a connected peer
    pub fn send(
        &self,
        manager: &ReactorManager,
        peer: SocketAddr,
        payload: &[u8],
    ) -> Result<(), Error> {
        let sender = self
            .commands
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::not_running("dtls.server.send"))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(Command::Send {
                peer: Some(peer),
                payload: payload.to_vec(),
                reply: reply_tx,
            })
            .map_err(|_| Error::closed("dtls.server.send"))?;
        manager
            .handle()
            .block_on(reply_rx)
            .map_err(|_| Error::closed("dtls.server.send"))?
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
    mut sessions: DtlsServerSessions,
    socket: UdpSocket,
    mut commands: mpsc::UnboundedReceiver<Command>,
    receive: Option<DatagramCallback>,
    mut stop: StopSignal,
) -> Result<(), Error> {
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        tokio::select! {
            _ = stop.stopped() => {
                debug!("dtls server stopping");
                return Ok(());
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    match sessions.on_datagram(peer, &buf[..len]) {
                        Ok(plaintexts) => {
                            if let Some(receive) = &receive {
                                let peer_name = peer.to_string();
                                for plaintext in &plaintexts {
                                    receive(&peer_name, plaintext);
                                }
                            }
                        }
                        Err(error) => {
                            // a broken association is dropped, not fatal
                            warn!(%peer, %error, "dtls association failed");
                            sessions.remove(&peer);
                            continue;
                        }
                    }
                    if let Some(engine) = sessions.get_mut(&peer) {
                        for datagram in engine.take_outgoing() {
                            if let Err(error) = socket.send_to(&datagram, peer).await {
                                warn!(%error, "dtls udp send failed");
                            }
                        }
                    }
                }
                Err(error) => return Err(Error::from_io("dtls.server.recv", error)),
            },
            command = commands.recv() => match command {
                Some(Command::Send { peer: Some(peer), payload, reply }) => {
                    let result = match sessions.get_mut(&peer) {
                        Some(engine) => {
                            let sent = engine.send(&payload).map_err(Error::from);
                            if sent.is_ok() {
                                for datagram in engine.take_outgoing() {
                                    let _ = socket.send_to(&datagram, peer).await;
                                }
                            }
                            sent
                        }
                        None => Err(Error::closed("dtls.server.send")),
                    };
                    let _ = reply.send(result);
                }
                Some(Command::Send { peer: None, reply, .. }) => {
                    let _ = reply.send(Err(Error::new(
                        ErrorKind::InvalidArgument,
                        "dtls.server.send",
                        "peer address required",
                    )));
                }
                None => return Ok(()),
            },
        }
    }
}
