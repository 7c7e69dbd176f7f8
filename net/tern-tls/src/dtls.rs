// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The DTLS datagram engine.
//!
//! OpenSSL runs against a pair of in-memory BIOs: received ciphertext
//! datagrams are written into the read side, and the write side is drained
//! into outgoing UDP datagrams after every handshake step and write. The
//! caller owns the socket; the engine never performs IO.
//!
//! Server deployments key one engine per peer address. Cookie exchange /
//! HelloVerifyRequest is not implemented: a spoofed source address can
//! allocate an engine, so untrusted-network deployments need an external
//! address-validation layer.

use crate::error::TlsError;
use openssl::{
    pkey::PKey,
    ssl::{ErrorCode, Ssl, SslContext, SslContextBuilder, SslMethod, SslStream, SslVerifyMode},
    x509::X509,
};
use std::{
    collections::{HashMap, VecDeque},
    io::{self, Read, Write},
    net::SocketAddr,
};
use tracing::{debug, trace};

/// Both halves of the memory BIO: `incoming` holds received ciphertext
/// datagrams, `outgoing` collects ciphertext to transmit
#[derive(Debug, Default)]
struct MemoryBio {
    incoming: VecDeque<Vec<u8>>,
    outgoing: VecDeque<Vec<u8>>,
}

impl Read for MemoryBio {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // one datagram per read call preserves DTLS record boundaries
        match self.incoming.pop_front() {
            Some(datagram) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(len)
            }
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }
}

impl Write for MemoryBio {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.push_back(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Builds a DTLS server context from PEM credentials
pub fn server_context(cert_pem: &[u8], key_pem: &[u8]) -> Result<SslContext, TlsError> {
    let certificate = X509::from_pem(cert_pem)
        .map_err(|error| TlsError::Credentials(error.to_string()))?;
    let key = PKey::private_key_from_pem(key_pem)
        .map_err(|error| TlsError::Credentials(error.to_string()))?;

    let mut builder = SslContextBuilder::new(SslMethod::dtls())?;
    builder.set_certificate(&certificate)?;
    builder.set_private_key(&key)?;
    builder.check_private_key()?;
    Ok(builder.build())
}

/// Builds a DTLS client context; `root_pem` is consulted only when
/// `verify_peer` is set
pub fn client_context(
    verify_peer: bool,
    root_pem: Option<&[u8]>,
) -> Result<SslContext, TlsError> {
    let mut builder = SslContextBuilder::new(SslMethod::dtls())?;

    if verify_peer {
        builder.set_verify(SslVerifyMode::PEER);
        if let Some(root_pem) = root_pem {
            let root = X509::from_pem(root_pem)
                .map_err(|error| TlsError::Credentials(error.to_string()))?;
            builder.cert_store_mut().add_cert(root)?;
        }
    } else {
        builder.set_verify(SslVerifyMode::NONE);
    }

    Ok(builder.build())
}

/// One DTLS association, driven entirely by memory BIOs
pub struct DtlsEngine {
    stream: SslStream<MemoryBio>,
    established: bool,
}

impl DtlsEngine {
    pub fn client(context: &SslContext) -> Result<Self, TlsError> {
        let mut ssl = Ssl::new(context)?;
        ssl.set_connect_state();
        Self::new(ssl)
    }

    pub fn server(context: &SslContext) -> Result<Self, TlsError> {
        let mut ssl = Ssl::new(context)?;
        ssl.set_accept_state();
        Self::new(ssl)
    }

    fn new(ssl: Ssl) -> Result<Self, TlsError> {
        let stream = SslStream::new(ssl, MemoryBio::default())
            .map_err(|error| TlsError::Config(error.to_string()))?;
        Ok(Self {
            stream,
            established: false,
        })
    }

    /// Clients call this once to produce the first handshake flight
    pub fn start(&mut self) -> Result<(), TlsError> {
        self.drive_handshake()
    }

    fn drive_handshake(&mut self) -> Result<(), TlsError> {
        if self.established {
            return Ok(());
        }

        match self.stream.do_handshake() {
            Ok(()) => {
                debug!("dtls handshake complete");
                self.established = true;
                Ok(())
            }
            Err(error)
                if matches!(error.code(), ErrorCode::WANT_READ | ErrorCode::WANT_WRITE) =>
            {
                // more flights required
                Ok(())
            }
            Err(error) => Err(TlsError::HandshakeFailed(error.to_string())),
        }
    }

    /// Feeds one received ciphertext datagram; returns any decrypted
    /// application payloads it produced
    pub fn on_datagram(&mut self, datagram: &[u8]) -> Result<Vec<Vec<u8>>, TlsError> {
        trace!(len = datagram.len(), "dtls datagram in");
        self.stream
            .get_mut()
            .incoming
            .push_back(datagram.to_vec());

        if !self.established {
            self.drive_handshake()?;
        }

        let mut plaintexts = Vec::new();
        if self.established {
            loop {
                let mut buf = vec![0u8; 16 * 1024];
                match self.stream.ssl_read(&mut buf) {
                    Ok(0) => break,
                    Ok(len) => {
                        buf.truncate(len);
                        plaintexts.push(buf);
                    }
                    Err(error)
                        if matches!(
                            error.code(),
                            ErrorCode::WANT_READ | ErrorCode::ZERO_RETURN
                        ) =>
                    {
                        break;
                    }
                    Err(error) => return Err(TlsError::HandshakeFailed(error.to_string())),
                }
            }
        }
        Ok(plaintexts)
    }

    /// Encrypts one application payload into outgoing datagrams
    pub fn send(&mut self, plaintext: &[u8]) -> Result<(), TlsError> {
        if !self.established {
            return Err(TlsError::NotConnected);
        }
        self.stream
            .ssl_write(plaintext)
            .map_err(|error| TlsError::HandshakeFailed(error.to_string()))?;
        Ok(())
    }

    /// Drains the ciphertext datagrams to put on the wire
    pub fn take_outgoing(&mut self) -> Vec<Vec<u8>> {
        self.stream.get_mut().outgoing.drain(..).collect()
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    /// Queues a close_notify; drain and send the result before dropping
    pub fn close(&mut self) {
        let _ = self.stream.shutdown();
    }
}

/// Per-peer DTLS engines for a server socket, keyed by source address
pub struct DtlsServerSessions {
    context: SslContext,
    sessions: HashMap<SocketAddr, DtlsEngine>,
}

impl DtlsServerSessions {
    pub fn new(context: SslContext) -> Self {
        Self {
            context,
            sessions: HashMap::new(),
        }
    }

    /// Routes a datagram to the peer's engine, creating one on first
    /// contact
    pub fn on_datagram(
        &mut self,
        peer: SocketAddr,
        datagram: &[u8],
    ) -> Result<Vec<Vec<u8>>, TlsError> {
        if !self.sessions.contains_key(&peer) {
            debug!(%peer, "new dtls association");
            let engine = DtlsEngine::server(&self.context)?;
            self.sessions.insert(peer, engine);
        }

        let engine = self.sessions.get_mut(&peer).expect("session just ensured");
        engine.on_datagram(datagram)
    }

    pub fn get_mut(&mut self, peer: &SocketAddr) -> Option<&mut DtlsEngine> {
        self.sessions.get_mut(peer)
    }

    pub fn remove(&mut self, peer: &SocketAddr) -> Option<DtlsEngine> {
        self.sessions.remove(peer)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> (Vec<u8>, Vec<u8>) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("certificate generation");
        (
            certified.cert.pem().into_bytes(),
            certified.key_pair.serialize_pem().into_bytes(),
        )
    }

    /// Pumps flights between the halves until neither produces output
    fn pump(client: &mut DtlsEngine, server: &mut DtlsEngine) {
        for _ in 0..32 {
            let mut progressed = false;
            for datagram in client.take_outgoing() {
                server.on_datagram(&datagram).unwrap();
                progressed = true;
            }
            for datagram in server.take_outgoing() {
                client.on_datagram(&datagram).unwrap();
                progressed = true;
            }
            if !progressed {
                return;
            }
        }
        panic!("dtls handshake did not quiesce");
    }

    #[test]
    fn handshake_and_round_trip_test() {
        let (cert_pem, key_pem) = credentials();
        let server_ctx = server_context(&cert_pem, &key_pem).unwrap();
        let client_ctx = client_context(false, None).unwrap();

        let mut client = DtlsEngine::client(&client_ctx).unwrap();
        let mut server = DtlsEngine::server(&server_ctx).unwrap();

        client.start().unwrap();
        pump(&mut client, &mut server);

        assert!(client.is_established());
        assert!(server.is_established());

        // client -> server application data
        client.send(b"ping").unwrap();
        let mut received = Vec::new();
        for datagram in client.take_outgoing() {
            received.extend(server.on_datagram(&datagram).unwrap());
        }
        assert_eq!(received, vec![b"ping".to_vec()]);

        // server -> client
        server.send(b"pong").unwrap();
        let mut received = Vec::new();
        for datagram in server.take_outgoing() {
            received.extend(client.on_datagram(&datagram).unwrap());
        }
        assert_eq!(received, vec![b"pong".to_vec()]);
    }

    #[test]
    fn send_before_establishment_fails_test() {
        let client_ctx = client_context(false, None).unwrap();
        let mut client = DtlsEngine::client(&client_ctx).unwrap();
        assert!(matches!(client.send(b"early"), Err(TlsError::NotConnected)));
    }

    #[test]
    fn server_sessions_keyed_by_peer_test() {
        let (cert_pem, key_pem) = credentials();
        let server_ctx = server_context(&cert_pem, &key_pem).unwrap();
        let client_ctx = client_context(false, None).unwrap();

        let mut sessions = DtlsServerSessions::new(server_ctx);

        let peer_a: SocketAddr = "127.0.0.1:1111".parse().unwrap();
        let peer_b: SocketAddr = "127.0.0.1:2222".parse().unwrap();

        let mut client_a = DtlsEngine::client(&client_ctx).unwrap();
        let mut client_b = DtlsEngine::client(&client_ctx).unwrap();
        client_a.start().unwrap();
        client_b.start().unwrap();

        for datagram in client_a.take_outgoing() {
            sessions.on_datagram(peer_a, &datagram).unwrap();
        }
        for datagram in client_b.take_outgoing() {
            sessions.on_datagram(peer_b, &datagram).unwrap();
        }

        assert_eq!(sessions.len(), 2);
        assert!(sessions.get_mut(&peer_a).is_some());
        assert!(sessions.remove(&peer_b).is_some());
        assert_eq!(sessions.len(), 1);
    }
}
