// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The messaging client.
//!
//! Connects over TCP, optionally negotiating TLS 1.3, and owns one session
//! for the life of the connection. Payloads handed to [`MessagingClient::send`]
//! while a connection attempt is in flight are queued and flushed once the
//! session is up.

use crate::{
    callbacks::Callbacks,
    config::ClientConfig,
    error::{Error, ErrorKind},
    runtime::ReactorManager,
    session::{next_session_id, Session},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tern_telemetry::{Span, SpanKind};
use tern_tls::{TlsClient, TlsClientOptions};
use tokio::{net::TcpStream, runtime::Handle};
use tracing::{debug, warn};

pub struct MessagingClient {
    config: ClientConfig,
    callbacks: Arc<Callbacks>,
    session: Mutex<Option<Arc<Session>>>,
    pending_sends: Mutex<Vec<Vec<u8>>>,
    connecting: AtomicBool,
    runtime: Mutex<Option<Handle>>,
}

impl MessagingClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            callbacks: Arc::new(Callbacks::new()),
            session: Mutex::new(None),
            pending_sends: Mutex::new(Vec::new()),
            connecting: AtomicBool::new(false),
            runtime: Mutex::new(None),
        }
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|session| !session.is_stopped())
    }

    /// Connects synchronously on the manager's worker pool
    pub fn connect(&self, manager: &ReactorManager) -> Result<(), Error> {
        let handle = manager.handle();
        *self.runtime.lock().unwrap() = Some(handle.clone());
        handle.clone().block_on(self.connect_on(handle))
    }

    /// Reconnects using the runtime captured by the first connect
    pub fn reconnect(&self) -> Result<(), Error> {
        let handle = self
            .runtime
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::not_running("client.reconnect"))?;
        handle.clone().block_on(self.connect_on(handle))
    }

    async fn connect_on(&self, runtime: Handle) -> Result<(), Error> {
        if self.is_connected() {
            return Err(Error::new(
                ErrorKind::AlreadyRunning,
                "client.connect",
                "client is already connected",
            ));
        }
        if self.connecting.swap(true, Ordering::AcqRel) {
            return Err(Error::new(
                ErrorKind::AlreadyRunning,
                "client.connect",
                "a connection attempt is in flight",
            ));
        }

        let result = self.establish(runtime).await;
        self.connecting.store(false, Ordering::Release);

        match result {
            Ok(()) => {
                self.flush_pending().await;
                Ok(())
            }
            Err(error) => {
                warn!(%error, "connect failed");
                Err(error)
            }
        }
    }

    async fn establish(&self, runtime: Handle) -> Result<(), Error> {
        let mut span = Span::with_kind("client.connect", SpanKind::Client);
        span.set_attribute("peer.host", self.config.host.clone());
        span.set_attribute("peer.port", i64::from(self.config.port));

        let address = (self.config.host.as_str(), self.config.port);
        let connected = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(address),
        )
        .await;

        let stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(error)) => {
                let error = Error::from_io("client.connect", error);
                span.set_error(&error.to_string());
                return Err(error);
            }
            Err(_) => {
                let error = Error::new(
                    ErrorKind::ConnectionTimeout,
                    "client.connect",
                    "connect deadline elapsed",
                );
                span.set_error(&error.to_string());
                return Err(error);
            }
        };
        let _ = stream.set_nodelay(true);
        let remote = stream
            .peer_addr()
            .map_err(|error| Error::from_io("client.connect", error))?;

        let (reader, writer): (crate::session::BoxedReader, crate::session::BoxedWriter) =
            if self.config.tls {
                let options = TlsClientOptions {
                    verify_peer: self.config.verify_peer,
                    root_certificates: self.config.root_certificates.clone(),
                    alpn_protocols: self
                        .config
                        .alpn_protocols
                        .iter()
                        .map(|protocol| protocol.as_bytes().to_vec())
                        .collect(),
                    enable_resumption: true,
                };
                let tls = TlsClient::new(&options)?;
                let tls_stream = tls
                    .connect(&self.config.host, stream, self.config.handshake_timeout)
                    .await?;
                let (read_half, write_half) = tokio::io::split(tls_stream);
                (Box::new(read_half), Box::new(write_half))
            } else {
                let (read_half, write_half) = stream.into_split();
                (Box::new(read_half), Box::new(write_half))
            };

        let session = Session::new(
            next_session_id(),
            remote,
            Default::default(),
            self.callbacks.clone(),
            writer,
            runtime,
        );
        session.start(reader);

        debug!(session = %session.id(), %remote, tls = self.config.tls, "client connected");
        *self.session.lock().unwrap() = Some(session);
        Ok(())
    }

    async fn flush_pending(&self) {
        let queued: Vec<_> = self.pending_sends.lock().unwrap().drain(..).collect();
        if queued.is_empty() {
            return;
        }

        let session = self.session.lock().unwrap().clone();
        if let Some(session) = session {
            for payload in queued {
                if let Err(error) = session.send(&payload).await {
                    warn!(%error, "queued payload dropped");
                    break;
                }
            }
        }
    }

    /// Sends one payload. While a connection attempt is in flight the
    /// payload is queued and flushed on success.
    pub fn send(&self, payload: &[u8]) -> Result<(), Error> {
        let session = self.session.lock().unwrap().clone();
        match session {
            Some(session) if !session.is_stopped() => {
                let handle = self
                    .runtime
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| Error::not_running("client.send"))?;
                handle.block_on(session.send(payload))
            }
            _ if self.connecting.load(Ordering::Acquire) => {
                self.pending_sends.lock().unwrap().push(payload.to_vec());
                Ok(())
            }
            _ => Err(Error::closed("client.send")),
        }
    }

    /// Async variant of [`MessagingClient::send`]
    pub async fn send_async(&self, payload: &[u8]) -> Result<(), Error> {
        let session = self.session.lock().unwrap().clone();
        match session {
            Some(session) if !session.is_stopped() => session.send(payload).await,
            _ if self.connecting.load(Ordering::Acquire) => {
                self.pending_sends.lock().unwrap().push(payload.to_vec());
                Ok(())
            }
            _ => Err(Error::closed("client.send")),
        }
    }

    /// Stops the session; idempotent
    pub fn stop(&self) {
        if let Some(session) = self.session.lock().unwrap().take() {
            session.stop();
        }
    }
}

impl Drop for MessagingClient {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_connection_fails_test() {
        let client = MessagingClient::new(ClientConfig::new("127.0.0.1", 1));
        let error = client.send(b"payload").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ConnectionClosed);
        assert!(!client.is_connected());
    }

    #[test]
    fn connect_refused_is_reported_test() {
        let manager = ReactorManager::new().unwrap();
        // an unroutable loopback port
        let client = MessagingClient::new(ClientConfig::new("127.0.0.1", 1));
        let error = client.connect(&manager).unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::ConnectionClosed | ErrorKind::InternalError | ErrorKind::ConnectionTimeout
        ));
    }
}
