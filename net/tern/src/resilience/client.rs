// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Retry and reconnection around a messaging transport.
//!
//! Every send first consults the circuit breaker; a rejected call returns
//! immediately with `CircuitOpen`. Failures back off exponentially
//! (`base × 2^(attempt−1)`, capped) and are reported to the breaker so
//! repeated trouble trips it.

use crate::{
    error::{Error, ErrorKind},
    resilience::breaker::{BreakerConfig, CircuitBreaker},
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// The transport operations the retry engine drives
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;
    fn connect(&self) -> Result<(), Error>;
    fn send(&self, payload: &[u8]) -> Result<(), Error>;
}

/// A [`MessagingClient`](crate::client::MessagingClient) is a transport
/// once it has connected through a manager (reconnect reuses the captured
/// runtime)
impl Transport for crate::client::MessagingClient {
    fn is_connected(&self) -> bool {
        crate::client::MessagingClient::is_connected(self)
    }

    fn connect(&self) -> Result<(), Error> {
        self.reconnect()
    }

    fn send(&self, payload: &[u8]) -> Result<(), Error> {
        crate::client::MessagingClient::send(self, payload)
    }
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        }
    }
}

pub type ReconnectCallback = Arc<dyn Fn(u32) + Send + Sync>;

pub struct ResilientClient<T: Transport> {
    transport: T,
    breaker: CircuitBreaker,
    retry: RetryConfig,
    reconnect_callback: std::sync::Mutex<Option<ReconnectCallback>>,
}

impl<T: Transport> ResilientClient<T> {
    pub fn new(transport: T, retry: RetryConfig, breaker: BreakerConfig) -> Self {
        Self {
            transport,
            breaker: CircuitBreaker::new(breaker),
            retry,
            reconnect_callback: std::sync::Mutex::new(None),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Registers a callback fired with the 1-based attempt index of each
    /// reconnection attempt
    pub fn on_reconnect(&self, callback: impl Fn(u32) + Send + Sync + 'static) {
        *self.reconnect_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    fn backoff(&self, attempt: u32) -> Duration {
        // base × 2^(attempt−1), capped
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.retry.base_delay.saturating_mul(1 << exponent);
        delay.min(self.retry.max_delay)
    }

    /// Sends with retry, reconnection, and breaker accounting
    pub fn send_with_retry(&self, payload: &[u8]) -> Result<(), Error> {
        for attempt in 1..=self.retry.max_retries {
            if !self.breaker.allow_call() {
                return Err(Error::new(
                    ErrorKind::CircuitOpen,
                    "resilient.send",
                    "circuit breaker is open",
                ));
            }

            if !self.transport.is_connected() {
                if let Err(error) = self.reconnect(attempt) {
                    self.breaker.record_failure();
                    warn!(attempt, %error, "reconnect failed");
                    self.sleep(attempt);
                    continue;
                }
            }

            match self.transport.send(payload) {
                Ok(()) => {
                    self.breaker.record_success();
                    return Ok(());
                }
                Err(error) => {
                    self.breaker.record_failure();
                    debug!(attempt, %error, "send failed");
                    self.sleep(attempt);
                }
            }
        }

        Err(Error::new(
            ErrorKind::SendFailed,
            "resilient.send",
            format!("retries exhausted after {} attempts", self.retry.max_retries),
        ))
    }

    fn reconnect(&self, attempt: u32) -> Result<(), Error> {
        let callback = self.reconnect_callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(attempt);
        }
        self.transport.connect()
    }

    fn sleep(&self, attempt: u32) {
        std::thread::sleep(self.backoff(attempt));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::breaker::BreakerState;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FlakyTransport {
        connected: AtomicBool,
        fail_sends: AtomicUsize,
        sends: AtomicUsize,
        connects: AtomicUsize,
    }

    impl Transport for FlakyTransport {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn connect(&self) -> Result<(), Error> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn send(&self, _payload: &[u8]) -> Result<(), Error> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail_sends.load(Ordering::SeqCst) > 0 {
                self.fail_sends.fetch_sub(1, Ordering::SeqCst);
                self.connected.store(false, Ordering::SeqCst);
                return Err(Error::new(ErrorKind::SendFailed, "test.send", "flaky"));
            }
            Ok(())
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn send_reconnects_first_test() {
        let client = ResilientClient::new(
            FlakyTransport::default(),
            fast_retry(),
            BreakerConfig::default(),
        );

        let attempts = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let attempts = attempts.clone();
            client.on_reconnect(move |attempt| {
                attempts.lock().unwrap().push(attempt);
            });
        }

        client.send_with_retry(b"payload").unwrap();

        assert_eq!(client.transport().connects.load(Ordering::SeqCst), 1);
        assert_eq!(attempts.lock().unwrap().as_slice(), &[1]);
        assert_eq!(client.breaker().state(), BreakerState::Closed);
    }

    #[test]
    fn transient_failure_retries_test() {
        let transport = FlakyTransport::default();
        transport.connected.store(true, Ordering::SeqCst);
        transport.fail_sends.store(2, Ordering::SeqCst);

        let client =
            ResilientClient::new(transport, fast_retry(), BreakerConfig::default());
        client.send_with_retry(b"payload").unwrap();
        assert_eq!(client.transport().sends.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn open_breaker_short_circuits_test() {
        let transport = FlakyTransport::default();
        transport.connected.store(true, Ordering::SeqCst);
        transport.fail_sends.store(100, Ordering::SeqCst);

        let breaker = BreakerConfig {
            failure_threshold: 2,
            open_duration: Duration::from_secs(60),
            ..Default::default()
        };
        let client = ResilientClient::new(transport, fast_retry(), breaker);

        // the first call trips the breaker after two failures
        assert_eq!(
            client.send_with_retry(b"payload").unwrap_err().kind(),
            ErrorKind::CircuitOpen
        );
        let sends_so_far = client.transport().sends.load(Ordering::SeqCst);
        assert_eq!(sends_so_far, 2);

        // subsequent calls fail immediately without touching the transport
        assert_eq!(
            client.send_with_retry(b"payload").unwrap_err().kind(),
            ErrorKind::CircuitOpen
        );
        assert_eq!(client.transport().sends.load(Ordering::SeqCst), sends_so_far);
    }

    #[test]
    fn backoff_schedule_test() {
        let client = ResilientClient::new(
            FlakyTransport::default(),
            RetryConfig {
                max_retries: 10,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(30),
            },
            BreakerConfig::default(),
        );

        assert_eq!(client.backoff(1), Duration::from_millis(100));
        assert_eq!(client.backoff(2), Duration::from_millis(200));
        assert_eq!(client.backoff(3), Duration::from_millis(400));
        // capped
        assert_eq!(client.backoff(20), Duration::from_secs(30));
    }
}
