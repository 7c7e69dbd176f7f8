// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;

/// Tunables for a single connection
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Close the connection after this long without sending or receiving a
    /// packet
    pub idle_timeout: Duration,
    /// The first retransmission deadline; doubles per expiry
    pub initial_pto: Duration,
    /// The retransmission backoff ceiling
    pub max_pto: Duration,
    /// The largest datagram the engine will produce
    pub max_datagram_size: usize,
    /// Connection-wide receive flow-control credit granted to the peer
    pub initial_max_data: u64,
    /// How long a closing connection lingers to retransmit its close before
    /// it is fully dropped
    pub drain_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            initial_pto: Duration::from_millis(250),
            max_pto: Duration::from_secs(10),
            max_datagram_size: 1200,
            initial_max_data: 1024 * 1024,
            drain_timeout: Duration::from_millis(750),
        }
    }
}

impl ConnectionConfig {
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}
