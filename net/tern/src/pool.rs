// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A bounded pool of ready clients with blocking acquire.
//!
//! `acquire` blocks on a condition variable until a client is available or
//! the pool shuts down; there is deliberately no acquire timeout. Released
//! clients are health-checked and reconnected once; a client that cannot
//! be revived is dropped from the pool, shrinking it.

use crate::error::{Error, ErrorKind};
use std::{
    collections::VecDeque,
    ops::Deref,
    sync::{Arc, Condvar, Mutex},
};
use tracing::{debug, warn};

/// The connection behavior a pool entry must provide
pub trait PoolableConnection: Send + Sync + 'static {
    fn is_connected(&self) -> bool;
    fn reconnect(&self) -> Result<(), Error>;
    fn stop(&self);
}

impl PoolableConnection for crate::client::MessagingClient {
    fn is_connected(&self) -> bool {
        MessagingClient::is_connected(self)
    }

    fn reconnect(&self) -> Result<(), Error> {
        MessagingClient::reconnect(self)
    }

    fn stop(&self) {
        MessagingClient::stop(self)
    }
}

use crate::client::MessagingClient;

impl ConnectionPool<MessagingClient> {
    /// Opens `config.size` connected messaging clients against
    /// `config.host:config.port`
    pub fn for_messaging(
        config: &crate::config::PoolConfig,
        manager: &crate::runtime::ReactorManager,
    ) -> Result<Self, Error> {
        Self::initialize(config.size, |_index| {
            let client = MessagingClient::new(crate::config::ClientConfig::new(
                config.host.clone(),
                config.port,
            ));
            client.connect(manager)?;
            Ok(client)
        })
    }
}

struct PoolState<C> {
    available: VecDeque<Arc<C>>,
    active: usize,
    shutdown: bool,
}

struct PoolInner<C> {
    state: Mutex<PoolState<C>>,
    condvar: Condvar,
    size: usize,
}

pub struct ConnectionPool<C: PoolableConnection> {
    inner: Arc<PoolInner<C>>,
}

impl<C: PoolableConnection> ConnectionPool<C> {
    /// Opens `size` connections up front. A failure aborts initialization
    /// and reports the failing index.
    pub fn initialize<F>(size: usize, factory: F) -> Result<Self, Error>
    where
        F: Fn(usize) -> Result<C, Error>,
    {
        if size == 0 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "pool.initialize",
                "pool size must be nonzero",
            ));
        }

        let mut available = VecDeque::with_capacity(size);
        for index in 0..size {
            let connection = factory(index).map_err(|error| {
                Error::new(
                    ErrorKind::InternalError,
                    "pool.initialize",
                    format!("connection {index} failed: {error}"),
                )
            })?;
            available.push_back(Arc::new(connection));
        }

        debug!(size, "pool initialized");
        Ok(Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    available,
                    active: 0,
                    shutdown: false,
                }),
                condvar: Condvar::new(),
                size,
            }),
        })
    }

    /// Blocks until a client is available. Returns `None` only on
    /// shutdown; availability and shutdown are the only wakeups.
    pub fn acquire(&self) -> Option<PooledConnection<C>> {
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(connection) = state.available.pop_front() {
                state.active += 1;
                debug_assert!(state.active + state.available.len() <= self.inner.size);
                return Some(PooledConnection {
                    pool: self.inner.clone(),
                    connection: Some(connection),
                });
            }
            state = self.inner.condvar.wait(state).unwrap();
        }
    }

    pub fn available_count(&self) -> usize {
        self.inner.state.lock().unwrap().available.len()
    }

    pub fn active_count(&self) -> usize {
        self.inner.state.lock().unwrap().active
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Marks the pool shut down, wakes all waiters, and stops every queued
    /// client
    pub fn shutdown(&self) {
        let queued: Vec<_> = {
            let mut state = self.inner.state.lock().unwrap();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.available.drain(..).collect()
        };
        self.inner.condvar.notify_all();

        for connection in queued {
            connection.stop();
        }
        debug!("pool shut down");
    }
}

impl<C: PoolableConnection> Drop for ConnectionPool<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A checked-out client; released back to the pool on drop
pub struct PooledConnection<C: PoolableConnection> {
    pool: Arc<PoolInner<C>>,
    connection: Option<Arc<C>>,
}

impl<C: PoolableConnection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.connection.as_ref().expect("present until drop")
    }
}

impl<C: PoolableConnection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let connection = self.connection.take().expect("present until drop");

        // health-check outside the pool lock
        let healthy = if connection.is_connected() {
            true
        } else {
            match connection.reconnect() {
                Ok(()) => true,
                Err(error) => {
                    warn!(%error, "pooled connection could not be revived; dropping it");
                    false
                }
            }
        };

        let mut state = self.pool.state.lock().unwrap();
        state.active = state.active.saturating_sub(1);

        if state.shutdown {
            drop(state);
            connection.stop();
            return;
        }

        if healthy {
            state.available.push_back(connection);
            drop(state);
            self.pool.condvar.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeConnection {
        connected: AtomicBool,
        revivable: bool,
        reconnects: AtomicUsize,
    }

    impl FakeConnection {
        fn new() -> Self {
            Self {
                connected: AtomicBool::new(true),
                revivable: true,
                reconnects: AtomicUsize::new(0),
            }
        }

        fn kill(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    impl PoolableConnection for FakeConnection {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn reconnect(&self) -> Result<(), Error> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            if self.revivable {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            } else {
                Err(Error::closed("test.reconnect"))
            }
        }

        fn stop(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn initialize_reports_failing_index_test() {
        let result = ConnectionPool::initialize(3, |index| {
            if index == 2 {
                Err(Error::closed("test.connect"))
            } else {
                Ok(FakeConnection::new())
            }
        });

        let error = result.err().expect("initialization must fail");
        assert!(error.message.contains("connection 2"));
    }

    #[test]
    fn accounting_invariant_test() {
        let pool = ConnectionPool::initialize(2, |_| Ok(FakeConnection::new())).unwrap();
        assert_eq!(pool.available_count() + pool.active_count(), 2);

        let first = pool.acquire().unwrap();
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.available_count(), 1);

        let second = pool.acquire().unwrap();
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.available_count(), 0);

        drop(first);
        drop(second);
        assert_eq!(pool.available_count() + pool.active_count(), 2);
    }

    #[test]
    fn release_reconnects_dead_connection_test() {
        let pool = ConnectionPool::initialize(1, |_| Ok(FakeConnection::new())).unwrap();

        {
            let connection = pool.acquire().unwrap();
            connection.kill();
        }

        let connection = pool.acquire().unwrap();
        assert!(connection.is_connected());
        assert_eq!(connection.reconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unrevivable_connection_is_dropped_test() {
        let pool = ConnectionPool::initialize(2, |_| {
            Ok(FakeConnection {
                connected: AtomicBool::new(true),
                revivable: false,
                reconnects: AtomicUsize::new(0),
            })
        })
        .unwrap();

        {
            let connection = pool.acquire().unwrap();
            connection.kill();
        }

        // the dead entry is gone; one connection remains
        assert_eq!(pool.available_count() + pool.active_count(), 1);
    }

    #[test]
    fn shutdown_wakes_blocked_acquirers_test() {
        let pool = Arc::new(
            ConnectionPool::initialize(1, |_| Ok(FakeConnection::new())).unwrap(),
        );

        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.acquire().is_none())
        };

        std::thread::sleep(std::time::Duration::from_millis(50));
        pool.shutdown();

        assert!(waiter.join().unwrap(), "shutdown returns a null handle");
        drop(held);
    }

    #[test]
    fn blocked_acquirer_gets_released_connection_test() {
        let pool = Arc::new(
            ConnectionPool::initialize(1, |_| Ok(FakeConnection::new())).unwrap(),
        );

        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.acquire().is_some())
        };

        std::thread::sleep(std::time::Duration::from_millis(50));
        drop(held);

        assert!(waiter.join().unwrap());
    }
}
