// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! One session per accepted peer.
//!
//! A session owns its protected socket halves, a bounded inbox, and the
//! callback slots. The read loop parses length-prefixed payloads into the
//! inbox; a dispatcher task delivers them to the receive callback one at a
//! time, so at most one receive callback per session runs concurrently.
//! Crossing the inbox's soft watermark logs a warning; crossing the hard
//! watermark disconnects the abusive peer.

use crate::{
    callbacks::Callbacks,
    config::SessionLimits,
    error::{Error, ErrorKind},
};
use bytes::Bytes;
use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    runtime::Handle,
    sync::Notify,
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Payloads are framed with a 32-bit big-endian length prefix
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a printable, unique session identifier
pub fn next_session_id() -> String {
    let counter = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let suffix: u16 = rand::random();
    format!("session-{counter}-{suffix:04x}")
}

pub struct Session {
    id: String,
    remote: SocketAddr,
    limits: SessionLimits,
    inbox: Mutex<VecDeque<Bytes>>,
    inbox_notify: Notify,
    callbacks: Arc<Callbacks>,
    stopped: AtomicBool,
    soft_warned: AtomicBool,
    writer: Arc<tokio::sync::Mutex<Option<BoxedWriter>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    runtime: Handle,
}

impl Session {
    pub fn new(
        id: String,
        remote: SocketAddr,
        limits: SessionLimits,
        callbacks: Arc<Callbacks>,
        writer: BoxedWriter,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            remote,
            limits,
            inbox: Mutex::new(VecDeque::new()),
            inbox_notify: Notify::new(),
            callbacks,
            stopped: AtomicBool::new(false),
            soft_warned: AtomicBool::new(false),
            writer: Arc::new(tokio::sync::Mutex::new(Some(writer))),
            tasks: Mutex::new(Vec::new()),
            runtime,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn inbox_depth(&self) -> usize {
        self.inbox.lock().unwrap().len()
    }

    /// Starts the read loop and the dispatcher on the shared runtime
    pub fn start(self: &Arc<Self>, reader: BoxedReader) {
        let read_task = self.runtime.spawn(read_loop(self.clone(), reader));
        let dispatch_task = self.runtime.spawn(dispatch_loop(self.clone()));

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(read_task);
        tasks.push(dispatch_task);
    }

    /// Sends one length-prefixed payload
    pub async fn send(&self, payload: &[u8]) -> Result<(), Error> {
        if self.is_stopped() {
            return Err(Error::closed("session.send"));
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "session.send",
                "payload exceeds frame limit",
            ));
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| Error::closed("session.send"))?;

        let len = (payload.len() as u32).to_be_bytes();
        let result = async {
            writer.write_all(&len).await?;
            writer.write_all(payload).await?;
            writer.flush().await
        }
        .await;

        result.map_err(|error| {
            Error::new(ErrorKind::SendFailed, "session.send", error.to_string())
        })
    }

    /// Queues a send on the session's runtime without waiting for the
    /// write to complete; failures are logged and stop the session
    pub fn send_detached(self: &Arc<Self>, payload: Vec<u8>) {
        let session = self.clone();
        self.runtime.spawn(async move {
            if let Err(error) = session.send(&payload).await {
                debug!(session = %session.id, %error, "detached send failed");
                session.disconnect();
            }
        });
    }

    /// Stops the session: no further callbacks fire, pending IO is
    /// cancelled, and the socket is shut down. Idempotent.
    pub fn stop(&self) {
        self.shutdown_once();
    }

    /// Returns true for the caller that performed the shutdown
    fn shutdown_once(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!(session = %self.id, "session stopping");

        self.inbox_notify.notify_one();

        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }

        let writer = self.writer.clone();
        self.runtime.spawn(async move {
            let mut guard = writer.lock().await;
            if let Some(mut writer) = guard.take() {
                let _ = writer.shutdown().await;
            }
        });
        true
    }

    /// Stops and fires the disconnect callback exactly once
    fn disconnect(&self) {
        if !self.shutdown_once() {
            return;
        }

        let callbacks = self.callbacks.load();
        if let Some(disconnect) = &callbacks.disconnect {
            disconnect(&self.id);
        }
    }

    /// Queues an inbound payload against the watermarks
    fn enqueue(&self, payload: Bytes) {
        if self.is_stopped() {
            return;
        }

        let depth = {
            let mut inbox = self.inbox.lock().unwrap();
            inbox.push_back(payload);
            inbox.len()
        };

        if depth >= self.limits.hard_limit {
            warn!(
                session = %self.id,
                depth,
                hard_limit = self.limits.hard_limit,
                "abusive peer: inbox hard limit reached, disconnecting"
            );
            self.disconnect();
            return;
        }

        if depth >= self.limits.soft_limit && !self.soft_warned.swap(true, Ordering::Relaxed) {
            warn!(
                session = %self.id,
                depth,
                soft_limit = self.limits.soft_limit,
                "inbox soft limit reached"
            );
        }

        self.inbox_notify.notify_one();
    }

    /// Dequeues one payload and hands it to the receive callback
    fn process_next_message(&self) -> bool {
        let payload = self.inbox.lock().unwrap().pop_front();
        let Some(payload) = payload else {
            return false;
        };

        let callbacks = self.callbacks.load();
        if let Some(receive) = &callbacks.receive {
            receive(&self.id, &payload);
        }
        true
    }

    fn on_read_error(&self, error: Error) {
        if self.is_stopped() {
            return;
        }

        let callbacks = self.callbacks.load();
        if let Some(on_error) = &callbacks.error {
            on_error(&self.id, &error);
        }
        self.disconnect();
    }
}

/// Reads length-prefixed payloads until the peer disconnects or the
/// session stops. Read completions are strictly serialized; the next read
/// is only issued after the current payload is queued.
async fn read_loop(session: Arc<Session>, mut reader: BoxedReader) {
    loop {
        if session.is_stopped() {
            return;
        }

        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => {
                // orderly remote close
                session.disconnect();
                return;
            }
            Err(error) => {
                session.on_read_error(Error::from_io("session.read", error));
                return;
            }
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_PAYLOAD_LEN {
            session.on_read_error(Error::new(
                ErrorKind::InvalidArgument,
                "session.read",
                "frame length exceeds limit",
            ));
            return;
        }

        let mut payload = vec![0u8; len];
        if let Err(error) = reader.read_exact(&mut payload).await {
            session.on_read_error(Error::from_io("session.read", error));
            return;
        }

        session.enqueue(Bytes::from(payload));
    }
}

/// Delivers queued payloads one at a time
async fn dispatch_loop(session: Arc<Session>) {
    loop {
        if session.is_stopped() {
            return;
        }
        if !session.process_next_message() {
            session.inbox_notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::duplex;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:4433".parse().unwrap()
    }

    async fn frame(writer: &mut (impl AsyncWrite + Unpin), payload: &[u8]) {
        writer
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .unwrap();
        writer.write_all(payload).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn receive_callbacks_serialized_test() {
        let callbacks = Arc::new(Callbacks::new());
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let delivered = Arc::new(AtomicUsize::new(0));

        {
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            let delivered = delivered.clone();
            callbacks.set_receive(move |_, _| {
                let current = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(2));
                concurrent.fetch_sub(1, Ordering::SeqCst);
                delivered.fetch_add(1, Ordering::SeqCst);
            });
        }

        let (mut peer, local) = duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(local);

        let session = Session::new(
            "session-test".to_string(),
            test_addr(),
            SessionLimits::default(),
            callbacks,
            Box::new(write_half),
            Handle::current(),
        );
        session.start(Box::new(read_half));

        for i in 0..10u8 {
            frame(&mut peer, &[i; 16]).await;
        }

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while delivered.load(Ordering::SeqCst) < 10 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all payloads delivered");

        assert_eq!(peak.load(Ordering::SeqCst), 1, "deliveries must serialize");
        session.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn hard_limit_disconnects_test() {
        let callbacks = Arc::new(Callbacks::new());
        let disconnected = Arc::new(AtomicUsize::new(0));

        // a receive callback that never returns quickly, so the inbox fills
        callbacks.set_receive(move |_, _| {
            std::thread::sleep(std::time::Duration::from_secs(5));
        });
        {
            let disconnected = disconnected.clone();
            callbacks.set_disconnect(move |_| {
                disconnected.fetch_add(1, Ordering::SeqCst);
            });
        }

        let (mut peer, local) = duplex(1024 * 1024);
        let (read_half, write_half) = tokio::io::split(local);

        let limits = SessionLimits {
            soft_limit: 10,
            hard_limit: 20,
        };
        let session = Session::new(
            "session-flood".to_string(),
            test_addr(),
            limits,
            callbacks,
            Box::new(write_half),
            Handle::current(),
        );
        session.start(Box::new(read_half));

        for _ in 0..25 {
            frame(&mut peer, &[0u8; 64]).await;
        }

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !session.is_stopped() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session must stop at the hard limit");

        assert!(session.inbox_depth() <= 20);
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);

        // sends fail once stopped
        assert!(session.send(b"late").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_is_idempotent_test() {
        let callbacks = Arc::new(Callbacks::new());
        let disconnected = Arc::new(AtomicUsize::new(0));
        {
            let disconnected = disconnected.clone();
            callbacks.set_disconnect(move |_| {
                disconnected.fetch_add(1, Ordering::SeqCst);
            });
        }

        let (_peer, local) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(local);

        let session = Session::new(
            "session-stop".to_string(),
            test_addr(),
            SessionLimits::default(),
            callbacks,
            Box::new(write_half),
            Handle::current(),
        );
        session.start(Box::new(read_half));

        session.stop();
        session.stop();
        assert!(session.is_stopped());
        // stop() alone does not fire the disconnect callback
        assert_eq!(disconnected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn remote_close_fires_disconnect_test() {
        let callbacks = Arc::new(Callbacks::new());
        let disconnected = Arc::new(AtomicUsize::new(0));
        {
            let disconnected = disconnected.clone();
            callbacks.set_disconnect(move |_| {
                disconnected.fetch_add(1, Ordering::SeqCst);
            });
        }

        let (peer, local) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(local);

        let session = Session::new(
            "session-eof".to_string(),
            test_addr(),
            SessionLimits::default(),
            callbacks,
            Box::new(write_half),
            Handle::current(),
        );
        session.start(Box::new(read_half));

        drop(peer);

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while disconnected.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("disconnect fires on eof");
        assert!(session.is_stopped());
    }
}
