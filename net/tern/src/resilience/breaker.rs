// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The circuit breaker.
//!
//! State transitions happen only inside `allow_call`, `record_success`,
//! and `record_failure`, serialized under one mutex so the transition
//! callback fires exactly once per transition.

use std::{
    sync::{
        atomic::{AtomicU32, AtomicU8, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open before probing
    pub open_duration: Duration,
    /// Successful probes required to close again
    pub half_open_successes: u32,
    /// Concurrent probes allowed while half-open
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            half_open_successes: 2,
            half_open_max_calls: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl BreakerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Closed,
            1 => Self::Open,
            _ => Self::HalfOpen,
        }
    }
}

type TransitionCallback = Arc<dyn Fn(BreakerState, BreakerState) + Send + Sync>;

struct Inner {
    opened_at: Option<Instant>,
    on_transition: Option<TransitionCallback>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,
    half_open_in_flight: AtomicU32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(BreakerState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            half_open_in_flight: AtomicU32::new(0),
            inner: Mutex::new(Inner {
                opened_at: None,
                on_transition: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Registers the transition callback, invoked with `(old, new)`
    pub fn on_transition(&self, callback: impl Fn(BreakerState, BreakerState) + Send + Sync + 'static) {
        self.inner.lock().unwrap().on_transition = Some(Arc::new(callback));
    }

    /// Serialized under the inner mutex by every caller. Returns the
    /// notification to fire once the caller has released the lock; the
    /// callback is never invoked with the lock held.
    #[must_use]
    fn transition(&self, inner: &mut Inner, next: BreakerState) -> Option<Notification> {
        let previous = BreakerState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if previous == next {
            return None;
        }
        debug!(?previous, ?next, "circuit breaker transition");

        match next {
            BreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
                self.half_open_successes.store(0, Ordering::Release);
                self.half_open_in_flight.store(0, Ordering::Release);
                inner.opened_at = None;
            }
            BreakerState::Open => {
                inner.opened_at = Some(Instant::now());
                self.half_open_successes.store(0, Ordering::Release);
                self.half_open_in_flight.store(0, Ordering::Release);
            }
            BreakerState::HalfOpen => {
                self.half_open_successes.store(0, Ordering::Release);
                self.half_open_in_flight.store(0, Ordering::Release);
            }
        }

        inner
            .on_transition
            .clone()
            .map(|callback| Notification {
                callback,
                previous,
                next,
            })
    }

    /// Whether a call may proceed right now
    pub fn allow_call(&self) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let mut inner = self.inner.lock().unwrap();
                // re-check under the lock to avoid duplicate transitions
                if self.state() != BreakerState::Open {
                    drop(inner);
                    return self.allow_call();
                }

                let elapsed = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed() >= self.config.open_duration)
                    .unwrap_or(true);
                if !elapsed {
                    return false;
                }

                let notification = self.transition(&mut inner, BreakerState::HalfOpen);
                // the caller becomes the first probe
                self.half_open_in_flight.store(1, Ordering::Release);
                drop(inner);
                fire(notification);
                true
            }
            BreakerState::HalfOpen => {
                let in_flight = self.half_open_in_flight.fetch_add(1, Ordering::AcqRel);
                if in_flight >= self.config.half_open_max_calls {
                    self.half_open_in_flight.fetch_sub(1, Ordering::AcqRel);
                    return false;
                }
                true
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            BreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            BreakerState::HalfOpen => {
                let mut inner = self.inner.lock().unwrap();
                if self.state() != BreakerState::HalfOpen {
                    return;
                }

                decrement(&self.half_open_in_flight);
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.half_open_successes {
                    let notification = self.transition(&mut inner, BreakerState::Closed);
                    drop(inner);
                    fire(notification);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    let mut inner = self.inner.lock().unwrap();
                    if self.state() == BreakerState::Closed {
                        let notification = self.transition(&mut inner, BreakerState::Open);
                        drop(inner);
                        fire(notification);
                    }
                }
            }
            BreakerState::HalfOpen => {
                let mut inner = self.inner.lock().unwrap();
                if self.state() == BreakerState::HalfOpen {
                    decrement(&self.half_open_in_flight);
                    let notification = self.transition(&mut inner, BreakerState::Open);
                    drop(inner);
                    fire(notification);
                }
            }
            BreakerState::Open => {}
        }
    }
}

struct Notification {
    callback: TransitionCallback,
    previous: BreakerState,
    next: BreakerState,
}

fn fire(notification: Option<Notification>) {
    if let Some(notification) = notification {
        (notification.callback)(notification.previous, notification.next);
    }
}

fn decrement(counter: &AtomicU32) {
    let mut current = counter.load(Ordering::Acquire);
    while current > 0 {
        match counter.compare_exchange_weak(
            current,
            current - 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            open_duration: Duration::from_millis(200),
            half_open_successes: 2,
            half_open_max_calls: 2,
        }
    }

    #[test]
    fn threshold_trips_exactly_once_test() {
        let breaker = CircuitBreaker::new(test_config());
        let transitions = Arc::new(Mutex::new(Vec::new()));
        {
            let transitions = transitions.clone();
            breaker.on_transition(move |old, new| {
                transitions.lock().unwrap().push((old, new));
            });
        }

        // threshold - 1 failures then a success keeps the breaker closed
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_call());
        assert!(transitions.lock().unwrap().is_empty());

        // a fresh run of `threshold` failures trips it, emitting one event
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_call());
        assert_eq!(
            transitions.lock().unwrap().as_slice(),
            &[(BreakerState::Closed, BreakerState::Open)]
        );
    }

    #[test]
    fn trip_and_recover_test() {
        let breaker = CircuitBreaker::new(test_config());

        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.allow_call());

        std::thread::sleep(Duration::from_millis(201));

        // the open window elapsed; the next check half-opens the breaker
        assert!(breaker.allow_call());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert!(breaker.allow_call());
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_call());
    }

    #[test]
    fn half_open_failure_reopens_test() {
        let breaker = CircuitBreaker::new(test_config());

        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(201));
        assert!(breaker.allow_call());

        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_call());
    }

    #[test]
    fn half_open_limits_probes_test() {
        let breaker = CircuitBreaker::new(test_config());

        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(201));

        // max_calls = 2: the transition probe plus one more
        assert!(breaker.allow_call());
        assert!(breaker.allow_call());
        assert!(!breaker.allow_call());
    }

    #[test]
    fn transition_callback_counts_test() {
        let breaker = CircuitBreaker::new(test_config());
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            breaker.on_transition(move |_, _| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(201));
        assert!(breaker.allow_call()); // -> half-open
        breaker.record_success();
        breaker.record_success(); // -> closed

        // closed -> open -> half-open -> closed
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
