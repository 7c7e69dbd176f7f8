// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The messaging server: a listening socket, a mutex-protected session
//! table, and a periodic sweep of stopped sessions.
//!
//! Accept fanout invokes user callbacks from a loaded snapshot, never with
//! the server's registry locked. TLS is a configuration: when certificate
//! paths are present the acceptor pins TLS 1.3, otherwise sessions run
//! over plain TCP.

use crate::{
    callbacks::Callbacks,
    config::ServerConfig,
    error::{Error, ErrorKind},
    runtime::{CompletionHandle, ReactorManager, StopSignal},
    session::{next_session_id, Session},
};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tern_telemetry::{NetworkMetrics, Span, SpanKind};
use tern_tls::TlsServer;
use tokio::{net::TcpListener, runtime::Handle};
use tracing::{debug, info, warn};

struct ServerState {
    completion: Option<CompletionHandle>,
    label: String,
    local_addr: Option<SocketAddr>,
}

pub struct MessagingServer {
    config: ServerConfig,
    callbacks: Arc<Callbacks>,
    sessions: Arc<Mutex<Vec<Arc<Session>>>>,
    state: Mutex<ServerState>,
    running: AtomicBool,
    accept_errors: Arc<AtomicU64>,
    metrics: Arc<NetworkMetrics>,
}

impl MessagingServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            callbacks: Arc::new(Callbacks::new()),
            sessions: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(ServerState {
                completion: None,
                label: String::new(),
                local_addr: None,
            }),
            running: AtomicBool::new(false),
            accept_errors: Arc::new(AtomicU64::new(0)),
            metrics: Arc::new(NetworkMetrics::new()),
        }
    }

    /// The server-level callback registry; sessions fan out into it
    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    pub fn metrics(&self) -> &NetworkMetrics {
        &self.metrics
    }

    pub fn accept_error_count(&self) -> u64 {
        self.accept_errors.load(Ordering::Relaxed)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().unwrap().local_addr
    }

    /// Sends a payload to a live session. The write happens on the
    /// session's runtime, so this is safe to call from inside callbacks.
    pub fn send_to(&self, session_id: &str, payload: &[u8]) -> Result<(), Error> {
        let session = self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .find(|session| session.id() == session_id)
            .cloned();

        match session {
            Some(session) if !session.is_stopped() => {
                session.send_detached(payload.to_vec());
                Ok(())
            }
            _ => Err(Error::closed("server.send")),
        }
    }

    /// Binds the listener and registers the accept loop. Configuration
    /// errors (bad credentials, bind failures) return synchronously.
    pub fn start(&self, manager: &ReactorManager) -> Result<SocketAddr, Error> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::new(
                ErrorKind::AlreadyRunning,
                "server.start",
                "listener is already running",
            ));
        }

        let tls = match self.build_tls() {
            Ok(tls) => tls,
            Err(error) => {
                self.running.store(false, Ordering::Release);
                return Err(error);
            }
        };

        let listener = match bind(self.config.listen_port) {
            Ok(listener) => listener,
            Err(error) => {
                self.running.store(false, Ordering::Release);
                return Err(error);
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|error| Error::from_io("server.start", error))?;

        info!(%local_addr, tls = tls.is_some(), "server listening");

        let label = format!("server-accept-{local_addr}");
        let loop_context = AcceptLoop {
            listener: Some(listener),
            tls,
            config: self.config.clone(),
            callbacks: self.callbacks.clone(),
            sessions: self.sessions.clone(),
            accept_errors: self.accept_errors.clone(),
            metrics: self.metrics.clone(),
            runtime: manager.handle(),
        };

        let completion = manager.register(&label, move |stop| loop_context.run(stop));

        let mut state = self.state.lock().unwrap();
        state.completion = Some(completion);
        state.label = label;
        state.local_addr = Some(local_addr);

        Ok(local_addr)
    }

    fn build_tls(&self) -> Result<Option<TlsServer>, Error> {
        if !self.config.is_tls() {
            return Ok(None);
        }

        let cert_path = self.config.cert_path.as_ref().expect("checked by is_tls");
        let key_path = self.config.key_path.as_ref().expect("checked by is_tls");

        let cert_pem = std::fs::read(cert_path).map_err(|error| {
            Error::new(
                ErrorKind::InvalidArgument,
                "server.start",
                format!("cert_path {}: {error}", cert_path.display()),
            )
        })?;
        let key_pem = std::fs::read(key_path).map_err(|error| {
            Error::new(
                ErrorKind::InvalidArgument,
                "server.start",
                format!("key_path {}: {error}", key_path.display()),
            )
        })?;

        Ok(Some(TlsServer::from_pem(&cert_pem, &key_pem, &[])?))
    }

    /// Stops the server. The ordering here is deliberate: cancel the
    /// accept loop, stop every session, wait for the accept driver to
    /// finish, let lingering completions drop their captures, and only
    /// then clear the session table.
    pub fn stop(&self, manager: &ReactorManager) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let (completion, label) = {
            let mut state = self.state.lock().unwrap();
            (state.completion.take(), std::mem::take(&mut state.label))
        };

        // 1-2: no new accepts, then stop each session
        manager.stop(&label);
        let sessions: Vec<_> = self.sessions.lock().unwrap().clone();
        for session in &sessions {
            session.stop();
        }
        drop(sessions);

        // 3-5: release the driver and wait for its run loop to complete
        if let Some(completion) = completion {
            let _ = manager.handle().block_on(completion.wait());
        }

        // 6: drain lingering completions so captured sockets destruct
        std::thread::sleep(Duration::from_millis(20));

        // 7: only now drop the session collection
        self.sessions.lock().unwrap().clear();
        self.state.lock().unwrap().local_addr = None;
        info!("server stopped");
    }
}

fn bind(port: u16) -> Result<std::net::TcpListener, Error> {
    let listener = std::net::TcpListener::bind(("0.0.0.0", port))
        .map_err(|error| Error::from_bind("server.start", error))?;
    listener
        .set_nonblocking(true)
        .map_err(|error| Error::from_io("server.start", error))?;
    Ok(listener)
}

struct AcceptLoop {
    listener: Option<std::net::TcpListener>,
    tls: Option<TlsServer>,
    config: ServerConfig,
    callbacks: Arc<Callbacks>,
    sessions: Arc<Mutex<Vec<Arc<Session>>>>,
    accept_errors: Arc<AtomicU64>,
    metrics: Arc<NetworkMetrics>,
    runtime: Handle,
}

impl AcceptLoop {
    async fn run(mut self, mut stop: StopSignal) -> Result<(), Error> {
        let listener = TcpListener::from_std(self.listener.take().expect("listener present"))
            .map_err(|error| Error::from_io("server.start", error))?;

        let mut cleanup = tokio::time::interval(self.config.cleanup_interval);
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                _ = cleanup.tick() => self.sweep_stopped_sessions(),
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => self.on_accept(stream, remote).await,
                    Err(error) => {
                        // transient accept failures are logged and counted;
                        // the listener keeps running
                        self.accept_errors.fetch_add(1, Ordering::Relaxed);
                        self.metrics.on_error();
                        warn!(%error, "accept failed");

                        let callbacks = self.callbacks.load();
                        if let Some(on_error) = &callbacks.error {
                            on_error("server", &Error::from_io("server.accept", error));
                        }
                    }
                },
            }
        }

        debug!("accept loop exited");
        Ok(())
    }

    fn sweep_stopped_sessions(&self) {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|session| !session.is_stopped());
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "swept stopped sessions");
        }
    }

    async fn on_accept(&self, stream: tokio::net::TcpStream, remote: SocketAddr) {
        let mut span = Span::with_kind("server.accept", SpanKind::Server);
        span.set_attribute("peer.address", remote.to_string());

        let session_id = next_session_id();
        let _ = stream.set_nodelay(true);

        let (reader, writer): (crate::session::BoxedReader, crate::session::BoxedWriter) =
            match &self.tls {
                Some(tls) => {
                    match tls.accept(stream, self.config.handshake_timeout).await {
                        Ok(tls_stream) => {
                            let (read_half, write_half) = tokio::io::split(tls_stream);
                            (Box::new(read_half), Box::new(write_half))
                        }
                        Err(error) => {
                            let error = Error::from(error);
                            warn!(%remote, %error, "tls accept failed");
                            span.set_error(&error.to_string());
                            self.metrics.on_error();

                            let callbacks = self.callbacks.load();
                            if let Some(on_error) = &callbacks.error {
                                on_error(&session_id, &error);
                            }
                            return;
                        }
                    }
                }
                None => {
                    let (read_half, write_half) = stream.into_split();
                    (Box::new(read_half), Box::new(write_half))
                }
            };

        let session = Session::new(
            session_id.clone(),
            remote,
            self.config.session_limits,
            self.callbacks.clone(),
            writer,
            self.runtime.clone(),
        );

        self.sessions.lock().unwrap().push(session.clone());
        session.start(reader);
        self.metrics.on_connection_accepted();
        debug!(session = %session_id, %remote, "session accepted");

        // fan out with a snapshot; the registry lock is never held here
        let callbacks = self.callbacks.load();
        if let Some(connection) = &callbacks.connection {
            connection(&session_id, remote);
        }
    }
}
