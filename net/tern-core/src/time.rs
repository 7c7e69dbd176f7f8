// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Monotonic time sources and component-owned timers

use core::{fmt, ops::Add, task::Poll, time::Duration};

/// A point in time, relative to an implementation-defined monotonic epoch
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// Creates a timestamp from a duration since the clock's epoch
    #[inline]
    pub const fn from_epoch(elapsed: Duration) -> Self {
        Self(elapsed)
    }

    /// Returns the duration since the clock's epoch
    #[inline]
    pub const fn as_duration(self) -> Duration {
        self.0
    }

    /// Returns `true` if `self` is at or before `current_time`
    #[inline]
    pub fn has_elapsed(self, current_time: Timestamp) -> bool {
        self <= current_time
    }

    /// Returns the duration elapsed since `earlier`, or zero when `earlier`
    /// is in the future
    #[inline]
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, duration: Duration) -> Self::Output {
        Timestamp(self.0 + duration)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?} after epoch", self.0)
    }
}

/// A source of monotonic timestamps
pub trait Clock {
    fn get_time(&self) -> Timestamp;
}

/// A clock that always returns the epoch; useful in tests
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopClock;

impl Clock for NoopClock {
    #[inline]
    fn get_time(&self) -> Timestamp {
        Timestamp::from_epoch(Duration::ZERO)
    }
}

/// A clock backed by [`std::time::Instant`] with a process-wide epoch
#[cfg(feature = "std")]
#[derive(Clone, Copy, Debug, Default)]
pub struct StdClock;

#[cfg(feature = "std")]
impl Clock for StdClock {
    #[inline]
    fn get_time(&self) -> Timestamp {
        use std::{sync::OnceLock, time::Instant};

        static EPOCH: OnceLock<Instant> = OnceLock::new();
        let epoch = *EPOCH.get_or_init(Instant::now);
        Timestamp::from_epoch(epoch.elapsed())
    }
}

/// A timer owned by an individual component; polled explicitly.
///
/// Note: the timer doesn't implement Copy to ensure it isn't accidentally
/// moved and the expiration discarded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timer {
    expiration: Option<Timestamp>,
}

impl Timer {
    /// Sets the timer to expire at the given timestamp
    #[inline]
    pub fn set(&mut self, time: Timestamp) {
        self.expiration = Some(time);
    }

    /// Cancels the timer. After cancellation, a timer no longer reports as
    /// expired.
    #[inline]
    pub fn cancel(&mut self) {
        self.expiration = None;
    }

    /// Returns true if the timer has expired
    #[inline]
    pub fn is_expired(&self, current_time: Timestamp) -> bool {
        match self.expiration {
            Some(timeout) => timeout.has_elapsed(current_time),
            _ => false,
        }
    }

    /// Returns true if the timer is armed
    #[inline]
    pub fn is_armed(&self) -> bool {
        self.expiration.is_some()
    }

    /// Returns the armed expiration, if any
    #[inline]
    pub fn expiration(&self) -> Option<Timestamp> {
        self.expiration
    }

    /// Notifies the timer of the current time. If the expiration has passed,
    /// the timer is cancelled and `Ready` is returned.
    #[inline]
    pub fn poll_expiration(&mut self, current_time: Timestamp) -> Poll<()> {
        if self.is_expired(current_time) {
            self.cancel();
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_lifecycle_test() {
        let epoch = NoopClock.get_time();
        let mut timer = Timer::default();

        assert!(!timer.is_armed());
        assert!(!timer.is_expired(epoch));

        timer.set(epoch + Duration::from_millis(100));
        assert!(timer.is_armed());
        assert!(!timer.is_expired(epoch));
        assert!(timer.poll_expiration(epoch).is_pending());

        let later = epoch + Duration::from_millis(100);
        assert!(timer.is_expired(later));
        assert!(timer.poll_expiration(later).is_ready());
        // polling disarms
        assert!(!timer.is_armed());
        assert!(timer.poll_expiration(later).is_pending());
    }

    #[test]
    fn saturating_duration_test() {
        let epoch = NoopClock.get_time();
        let later = epoch + Duration::from_secs(1);
        assert_eq!(later.saturating_duration_since(epoch), Duration::from_secs(1));
        assert_eq!(epoch.saturating_duration_since(later), Duration::ZERO);
    }
}
