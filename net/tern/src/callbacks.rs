// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Registration-race-free callback slots.
//!
//! The whole callback set lives behind an atomically swapped `Arc`; the
//! read loop loads it without locking, so registration never pauses
//! in-flight IO. Invokers load a snapshot first and call user code with no
//! lock held.

use crate::error::Error;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Payload delivery: `(session_id, payload)`
pub type ReceiveCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;
/// A session ended: `(session_id)`
pub type DisconnectCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// A structured error: `(session_id, error)`
pub type ErrorCallback = Arc<dyn Fn(&str, &Error) + Send + Sync>;
/// A QUIC connection closed: `(session_id, error_code, reason)`
pub type CloseCallback = Arc<dyn Fn(&str, u64, &str) + Send + Sync>;
/// A new connection was accepted: `(session_id, remote_address)`
pub type ConnectionCallback = Arc<dyn Fn(&str, std::net::SocketAddr) + Send + Sync>;

#[derive(Clone, Default)]
pub struct CallbackSet {
    pub receive: Option<ReceiveCallback>,
    pub disconnect: Option<DisconnectCallback>,
    pub error: Option<ErrorCallback>,
    pub close: Option<CloseCallback>,
    pub connection: Option<ConnectionCallback>,
}

/// The shared, swappable callback registry
pub struct Callbacks {
    set: ArcSwap<CallbackSet>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            set: ArcSwap::from_pointee(CallbackSet::default()),
        }
    }
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a point-in-time snapshot; user code is invoked against the
    /// snapshot so registration never races an in-flight delivery
    pub fn load(&self) -> Arc<CallbackSet> {
        self.set.load_full()
    }

    fn update(&self, mutate: impl FnOnce(&mut CallbackSet)) {
        let mut next = CallbackSet::clone(&self.set.load_full());
        mutate(&mut next);
        self.set.store(Arc::new(next));
    }

    pub fn set_receive(&self, callback: impl Fn(&str, &[u8]) + Send + Sync + 'static) {
        self.update(|set| set.receive = Some(Arc::new(callback)));
    }

    pub fn set_disconnect(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.update(|set| set.disconnect = Some(Arc::new(callback)));
    }

    pub fn set_error(&self, callback: impl Fn(&str, &Error) + Send + Sync + 'static) {
        self.update(|set| set.error = Some(Arc::new(callback)));
    }

    pub fn set_close(&self, callback: impl Fn(&str, u64, &str) + Send + Sync + 'static) {
        self.update(|set| set.close = Some(Arc::new(callback)));
    }

    pub fn set_connection(
        &self,
        callback: impl Fn(&str, std::net::SocketAddr) + Send + Sync + 'static,
    ) {
        self.update(|set| set.connection = Some(Arc::new(callback)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn registration_does_not_disturb_snapshots_test() {
        let callbacks = Callbacks::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let observed = hits.clone();
        callbacks.set_receive(move |_, _| {
            observed.fetch_add(1, Ordering::Relaxed);
        });

        let snapshot = callbacks.load();

        // a registration after the snapshot does not affect it
        callbacks.set_receive(|_, _| {});

        snapshot.receive.as_ref().unwrap()("session", b"data");
        assert_eq!(hits.load(Ordering::Relaxed), 1);

        // the fresh snapshot sees the replacement
        let fresh = callbacks.load();
        fresh.receive.as_ref().unwrap()("session", b"data");
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
