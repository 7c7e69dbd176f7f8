// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sent-packet tracking and PTO-based retransmission.
//!
//! Loss detection is deliberately simple: a single probe timer re-queues
//! every unacknowledged ack-eliciting frame when it fires, with doubling
//! backoff. ACK handling walks the acknowledged ranges and releases
//! matching packets; the hooks are shaped so a congestion controller could
//! observe the same signals.

use crate::pending::PendingFrame;
use core::time::Duration;
use tern_core::{
    frame::ack::AckRanges,
    space::{EncryptionLevel, LevelSet},
    time::{Timer, Timestamp},
};

#[derive(Debug)]
struct SentPacket {
    packet_number: u64,
    frames: Vec<PendingFrame>,
    ack_eliciting: bool,
}

#[derive(Debug)]
pub struct Recovery {
    sent: LevelSet<Vec<SentPacket>>,
    timer: Timer,
    initial_pto: Duration,
    max_pto: Duration,
    pto: Duration,
}

impl Recovery {
    pub fn new(initial_pto: Duration, max_pto: Duration) -> Self {
        Self {
            sent: LevelSet::default(),
            timer: Timer::default(),
            initial_pto,
            max_pto,
            pto: initial_pto,
        }
    }

    /// Records a protected packet; ack-eliciting packets arm the probe
    /// timer
    pub fn on_packet_sent(
        &mut self,
        level: EncryptionLevel,
        packet_number: u64,
        frames: Vec<PendingFrame>,
        now: Timestamp,
    ) {
        let ack_eliciting = frames.iter().any(PendingFrame::is_ack_eliciting);

        if ack_eliciting && !self.timer.is_armed() {
            self.timer.set(now + self.pto);
        }

        self.sent.get_mut(level).push(SentPacket {
            packet_number,
            frames,
            ack_eliciting,
        });
    }

    /// Releases every packet covered by `ranges`. Acknowledging any
    /// ack-eliciting packet resets the backoff.
    pub fn on_ack_received(&mut self, level: EncryptionLevel, ranges: &AckRanges) {
        let sent = self.sent.get_mut(level);
        let before = sent.len();
        sent.retain(|packet| !ranges.contains(packet.packet_number));

        if sent.len() != before {
            self.pto = self.initial_pto;
        }

        if !self.has_ack_eliciting_in_flight() {
            self.timer.cancel();
        }
    }

    /// Abandons a level's packets outright (e.g. when its keys are
    /// discarded at handshake completion)
    pub fn discard_level(&mut self, level: EncryptionLevel) {
        self.sent.get_mut(level).clear();
        if !self.has_ack_eliciting_in_flight() {
            self.timer.cancel();
        }
    }

    fn has_ack_eliciting_in_flight(&self) -> bool {
        self.sent
            .iter()
            .any(|(_, packets)| packets.iter().any(|packet| packet.ack_eliciting))
    }

    /// The next retransmission deadline, if armed
    pub fn deadline(&self) -> Option<Timestamp> {
        self.timer.expiration()
    }

    /// Fires the probe timer if it has expired: every in-flight
    /// ack-eliciting frame is drained for re-queueing and the backoff
    /// doubles, capped at the configured ceiling.
    pub fn on_timeout(
        &mut self,
        now: Timestamp,
    ) -> Option<Vec<(EncryptionLevel, Vec<PendingFrame>)>> {
        if !self.timer.poll_expiration(now).is_ready() {
            return None;
        }

        let mut lost = Vec::new();
        for (level, packets) in self.sent.iter_mut() {
            let mut frames = Vec::new();
            for packet in packets.drain(..) {
                if packet.ack_eliciting {
                    frames.extend(packet.frames);
                }
            }
            if !frames.is_empty() {
                lost.push((level, frames));
            }
        }

        self.pto = (self.pto * 2).min(self.max_pto);
        if !lost.is_empty() {
            self.timer.set(now + self.pto);
        }

        Some(lost)
    }

    pub fn in_flight(&self, level: EncryptionLevel) -> usize {
        self.sent.get(level).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::time::{Clock, NoopClock};

    fn ping() -> Vec<PendingFrame> {
        vec![PendingFrame::Ping]
    }

    #[test]
    fn ack_releases_packets_test() {
        let mut recovery = Recovery::new(Duration::from_millis(250), Duration::from_secs(10));
        let now = NoopClock.get_time();

        recovery.on_packet_sent(EncryptionLevel::Application, 0, ping(), now);
        recovery.on_packet_sent(EncryptionLevel::Application, 1, ping(), now);
        assert_eq!(recovery.in_flight(EncryptionLevel::Application), 2);
        assert!(recovery.deadline().is_some());

        let ranges: AckRanges = [0u64, 1].into_iter().collect();
        recovery.on_ack_received(EncryptionLevel::Application, &ranges);

        assert_eq!(recovery.in_flight(EncryptionLevel::Application), 0);
        assert!(recovery.deadline().is_none());
    }

    #[test]
    fn pto_requeues_and_backs_off_test() {
        let mut recovery = Recovery::new(Duration::from_millis(250), Duration::from_secs(10));
        let now = NoopClock.get_time();

        recovery.on_packet_sent(EncryptionLevel::Initial, 0, ping(), now);

        // not yet expired
        assert!(recovery.on_timeout(now).is_none());

        let fired = recovery
            .on_timeout(now + Duration::from_millis(250))
            .expect("timer expired");
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, EncryptionLevel::Initial);
        assert_eq!(fired[0].1, ping());

        // backoff doubled
        let deadline = recovery.deadline().expect("rearmed");
        assert_eq!(
            deadline,
            now + Duration::from_millis(250) + Duration::from_millis(500)
        );
    }

    #[test]
    fn backoff_caps_test() {
        let mut recovery = Recovery::new(Duration::from_millis(250), Duration::from_secs(1));
        let mut now = NoopClock.get_time();

        recovery.on_packet_sent(EncryptionLevel::Application, 0, ping(), now);

        for _ in 0..8 {
            let deadline = recovery.deadline().unwrap();
            now = deadline;
            let lost = recovery.on_timeout(now).expect("expired");
            for (level, frames) in lost {
                recovery.on_packet_sent(level, 99, frames, now);
            }
        }

        // capped at one second
        assert!(recovery.deadline().unwrap() <= now + Duration::from_secs(1));
    }
}
