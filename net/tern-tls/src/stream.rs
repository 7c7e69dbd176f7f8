// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The TLS 1.3 stream engine.
//!
//! Acceptors and connectors pin the protocol to TLS 1.3 with the
//! AES-256-GCM, CHACHA20-POLY1305, and AES-128-GCM suites. Handshakes run
//! under a deadline; certificate verification can be bypassed for tests
//! and private deployments.

use crate::error::TlsError;
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::CryptoProvider,
    CipherSuite, ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig,
    SignatureScheme,
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use std::{io::BufReader, sync::Arc, time::Duration};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};

const PINNED_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS13_AES_128_GCM_SHA256,
];

/// The ring provider restricted to the pinned cipher suites
fn pinned_provider() -> CryptoProvider {
    let mut provider = rustls::crypto::ring::default_provider();
    provider
        .cipher_suites
        .retain(|suite| PINNED_SUITES.contains(&suite.suite()));
    provider
}

fn load_certs(cert_pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| TlsError::Credentials(error.to_string()))?;
    if certs.is_empty() {
        return Err(TlsError::Credentials("no certificate in pem".to_string()));
    }
    Ok(certs)
}

fn load_key(key_pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut BufReader::new(key_pem))
        .map_err(|error| TlsError::Credentials(error.to_string()))?
        .ok_or_else(|| TlsError::Credentials("no private key in pem".to_string()))
}

/// A TLS 1.3 acceptor over any stream transport
#[derive(Clone)]
pub struct TlsServer {
    acceptor: TlsAcceptor,
}

impl TlsServer {
    pub fn from_pem(
        cert_pem: &[u8],
        key_pem: &[u8],
        alpn_protocols: &[Vec<u8>],
    ) -> Result<Self, TlsError> {
        let mut config = ServerConfig::builder_with_provider(Arc::new(pinned_provider()))
            //= https://www.rfc-editor.org/rfc/rfc8446#section-4.1.2
            //# TLS 1.3 ClientHellos are identified as having a legacy_version
            //# of 0x0303 and a supported_versions extension present
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_no_client_auth()
            .with_single_cert(load_certs(cert_pem)?, load_key(key_pem)?)?;
        config.alpn_protocols = alpn_protocols.to_vec();

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// Runs the server side of the handshake under `deadline`
    pub async fn accept<S>(
        &self,
        stream: S,
        deadline: Duration,
    ) -> Result<server::TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let handshake = self.acceptor.accept(stream);
        match tokio::time::timeout(deadline, handshake).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(error)) => Err(TlsError::HandshakeFailed(error.to_string())),
            Err(_) => Err(TlsError::HandshakeTimeout),
        }
    }
}

/// Client-side knobs. `Default` verifies the peer against an empty root
/// store, so callers either install roots or disable verification.
#[derive(Clone, Debug)]
pub struct TlsClientOptions {
    /// When false, the server certificate is accepted without validation
    pub verify_peer: bool,
    /// Trusted roots in PEM form, consulted when `verify_peer` is set
    pub root_certificates: Option<Vec<u8>>,
    pub alpn_protocols: Vec<Vec<u8>>,
    /// Keep rustls' in-memory session cache for resumption tickets
    pub enable_resumption: bool,
}

impl Default for TlsClientOptions {
    fn default() -> Self {
        Self {
            verify_peer: true,
            root_certificates: None,
            alpn_protocols: Vec::new(),
            enable_resumption: true,
        }
    }
}

/// A TLS 1.3 connector over any stream transport
#[derive(Clone)]
pub struct TlsClient {
    connector: TlsConnector,
}

impl TlsClient {
    pub fn new(options: &TlsClientOptions) -> Result<Self, TlsError> {
        let provider = Arc::new(pinned_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?;

        let mut config = if options.verify_peer {
            let mut roots = RootCertStore::empty();
            if let Some(root_pem) = &options.root_certificates {
                for cert in load_certs(root_pem)? {
                    roots
                        .add(cert)
                        .map_err(|error| TlsError::Credentials(error.to_string()))?;
                }
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerification::new(provider)))
                .with_no_client_auth()
        };

        config.alpn_protocols = options.alpn_protocols.clone();
        if !options.enable_resumption {
            config.resumption = rustls::client::Resumption::disabled();
        }

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Runs the client side of the handshake under `deadline`
    pub async fn connect<S>(
        &self,
        server_name: &str,
        stream: S,
        deadline: Duration,
    ) -> Result<client::TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|error| TlsError::Config(error.to_string()))?;

        let handshake = self.connector.connect(server_name, stream);
        match tokio::time::timeout(deadline, handshake).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(error)) => Err(TlsError::HandshakeFailed(error.to_string())),
            Err(_) => Err(TlsError::HandshakeTimeout),
        }
    }
}

/// Accepts any server certificate; the `verify_peer = false` path
#[derive(Debug)]
struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl NoVerification {
    fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn self_signed() -> (Vec<u8>, Vec<u8>) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("certificate generation");
        (
            certified.cert.pem().into_bytes(),
            certified.key_pair.serialize_pem().into_bytes(),
        )
    }

    #[tokio::test]
    async fn tls13_echo_test() {
        let (cert_pem, key_pem) = self_signed();
        let server = TlsServer::from_pem(&cert_pem, &key_pem, &[]).unwrap();
        let client = TlsClient::new(&TlsClientOptions {
            verify_peer: false,
            enable_resumption: true,
            ..Default::default()
        })
        .unwrap();

        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let deadline = Duration::from_secs(5);

        let server_task = tokio::spawn(async move {
            let mut stream = server.accept(server_io, deadline).await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
            stream.write_all(b"pong").await.unwrap();
            stream.flush().await.unwrap();
            stream
        });

        let mut stream = client
            .connect("localhost", client_io, deadline)
            .await
            .unwrap();

        {
            let (_, session) = stream.get_ref();
            assert_eq!(
                session.protocol_version(),
                Some(rustls::ProtocolVersion::TLSv1_3)
            );
        }

        stream.write_all(b"ping").await.unwrap();
        stream.flush().await.unwrap();

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn verified_client_with_trusted_root_test() {
        let (cert_pem, key_pem) = self_signed();
        let server = TlsServer::from_pem(&cert_pem, &key_pem, &[]).unwrap();
        let client = TlsClient::new(&TlsClientOptions {
            verify_peer: true,
            root_certificates: Some(cert_pem.clone()),
            enable_resumption: true,
            ..Default::default()
        })
        .unwrap();

        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let deadline = Duration::from_secs(5);

        let server_task = tokio::spawn(async move {
            let _ = server.accept(server_io, deadline).await;
        });

        client
            .connect("localhost", client_io, deadline)
            .await
            .expect("trusted root should verify");
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn tls12_client_is_rejected_test() {
        let (cert_pem, key_pem) = self_signed();
        let server = TlsServer::from_pem(&cert_pem, &key_pem, &[]).unwrap();

        // a client pinned to TLS 1.2 cannot negotiate with the acceptor
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS12])
            .unwrap()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification::new(provider)))
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let deadline = Duration::from_secs(5);

        let server_task =
            tokio::spawn(async move { server.accept(server_io, deadline).await });

        let server_name = ServerName::try_from("localhost".to_string()).unwrap();
        let client_result = connector.connect(server_name, client_io).await;
        assert!(client_result.is_err(), "tls 1.2 must not negotiate");

        let server_result = server_task.await.unwrap();
        assert!(matches!(server_result, Err(TlsError::HandshakeFailed(_))));
    }

    #[tokio::test]
    async fn handshake_deadline_test() {
        let (cert_pem, key_pem) = self_signed();
        let server = TlsServer::from_pem(&cert_pem, &key_pem, &[]).unwrap();

        // the peer never writes a ClientHello
        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let result = server.accept(server_io, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(TlsError::HandshakeTimeout)));
        drop(client_io);
    }
}
