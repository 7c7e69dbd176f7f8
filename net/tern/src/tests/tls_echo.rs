// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A TLS 1.3 server echoes a client payload end to end over real sockets

use crate::{
    tests::setup::{self_signed_cert_files, wait_until},
    ClientConfig, MessagingClient, MessagingServer, ReactorManager, ServerConfig,
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

#[test]
fn tls_echo_test() {
    let manager = ReactorManager::new().unwrap();
    let (cert_path, key_path) = self_signed_cert_files("tls-echo");

    let server = Arc::new(MessagingServer::new(
        ServerConfig::default().with_tls(cert_path, key_path),
    ));

    // echo every payload back on the originating session
    {
        let echo_server = server.clone();
        server.callbacks().set_receive(move |session_id, payload| {
            echo_server
                .send_to(session_id, payload)
                .expect("echo target session is live");
        });
    }

    let addr = server.start(&manager).unwrap();

    // self-signed cert: the client skips chain validation
    let client = MessagingClient::new(
        ClientConfig::new("localhost", addr.port()).with_tls(false),
    );

    let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
    {
        let received = received.clone();
        client.callbacks().set_receive(move |_, payload| {
            received.lock().unwrap().push(payload.to_vec());
        });
    }

    client.connect(&manager).unwrap();
    assert!(client.is_connected());

    client.send(b"ping").unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            !received.lock().unwrap().is_empty()
        }),
        "the echo must arrive"
    );
    assert_eq!(received.lock().unwrap()[0], b"ping");

    client.stop();
    server.stop(&manager);
}

#[test]
fn plain_tcp_echo_test() {
    let manager = ReactorManager::new().unwrap();
    let server = Arc::new(MessagingServer::new(ServerConfig::default()));

    {
        let echo_server = server.clone();
        server.callbacks().set_receive(move |session_id, payload| {
            let _ = echo_server.send_to(session_id, payload);
        });
    }

    let connections = Arc::new(Mutex::new(Vec::new()));
    {
        let connections = connections.clone();
        server.callbacks().set_connection(move |session_id, remote| {
            connections
                .lock()
                .unwrap()
                .push((session_id.to_string(), remote));
        });
    }

    let addr = server.start(&manager).unwrap();

    let client = MessagingClient::new(ClientConfig::new("127.0.0.1", addr.port()));
    let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
    {
        let received = received.clone();
        client.callbacks().set_receive(move |_, payload| {
            received.lock().unwrap().push(payload.to_vec());
        });
    }

    client.connect(&manager).unwrap();
    client.send(b"hello over tcp").unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        !received.lock().unwrap().is_empty()
    }));
    assert_eq!(received.lock().unwrap()[0], b"hello over tcp");
    assert_eq!(connections.lock().unwrap().len(), 1);

    client.stop();
    server.stop(&manager);
}
