// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Configuration surfaces for servers, clients, sessions, and pools

use std::{path::PathBuf, time::Duration};

/// Backpressure watermarks for a session's inbox
#[derive(Clone, Copy, Debug)]
pub struct SessionLimits {
    /// Crossing this depth logs a warning
    pub soft_limit: usize,
    /// Crossing this depth disconnects the peer
    pub hard_limit: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            soft_limit: 1000,
            hard_limit: 2000,
        }
    }
}

impl SessionLimits {
    pub fn new(soft_limit: usize) -> Self {
        Self {
            soft_limit,
            hard_limit: soft_limit * 2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port to listen on; 0 picks an ephemeral port
    pub listen_port: u16,
    /// PEM certificate chain; TLS is enabled when both paths are present
    pub cert_path: Option<PathBuf>,
    /// PEM private key
    pub key_path: Option<PathBuf>,
    pub session_limits: SessionLimits,
    /// How often stopped sessions are swept from the session table
    pub cleanup_interval: Duration,
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            cert_path: None,
            key_path: None,
            session_limits: SessionLimits::default(),
            cleanup_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    pub fn with_port(mut self, listen_port: u16) -> Self {
        self.listen_port = listen_port;
        self
    }

    pub fn with_tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(cert_path.into());
        self.key_path = Some(key_path.into());
        self
    }

    pub fn with_session_limits(mut self, limits: SessionLimits) -> Self {
        self.session_limits = limits;
        self
    }

    pub fn is_tls(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Negotiate TLS after connecting
    pub tls: bool,
    /// Validate the server certificate chain; disable for self-signed
    /// deployments
    pub verify_peer: bool,
    /// Trusted roots in PEM form, consulted when `verify_peer` is set
    pub root_certificates: Option<Vec<u8>>,
    pub alpn_protocols: Vec<String>,
    pub idle_timeout: Duration,
    pub handshake_timeout: Duration,
    pub connect_timeout: Duration,
    /// Opaque TLS session ticket from a previous connection, for
    /// resumption
    pub session_ticket: Option<Vec<u8>>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
            verify_peer: true,
            root_certificates: None,
            alpn_protocols: Vec::new(),
            idle_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            session_ticket: None,
        }
    }

    pub fn with_tls(mut self, verify_peer: bool) -> Self {
        self.tls = true;
        self.verify_peer = verify_peer;
        self
    }

    pub fn with_alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn_protocols = protocols.iter().map(|p| p.to_string()).collect();
        self
    }
}

/// Connection pool sizing
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub size: usize,
    pub host: String,
    pub port: u16,
}

impl PoolConfig {
    pub fn new(size: usize, host: impl Into<String>, port: u16) -> Self {
        Self {
            size,
            host: host.into(),
            port,
        }
    }
}
