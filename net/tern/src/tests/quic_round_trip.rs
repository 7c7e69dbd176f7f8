// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A QUIC client and server exchange a stream payload over loopback UDP

use crate::{
    quic::{ProtectionFactory, QuicCallbacks, QuicClient, QuicServer},
    tests::setup::wait_until,
    ReactorManager,
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tern_core::crypto::testing::{NullProtection, ScriptedHandshake};
use tern_transport::ConnectionConfig;

#[test]
fn quic_single_stream_round_trip_test() {
    let manager = ReactorManager::new().unwrap();

    let server = QuicServer::new();

    // the server echoes "ok" with FIN once a stream finishes
    #[derive(Default)]
    struct ServerSeen {
        bytes: usize,
        fin: bool,
        peer: Option<String>,
        stream: Option<u64>,
    }
    let seen = Arc::new(Mutex::new(ServerSeen::default()));
    {
        let seen = seen.clone();
        server.set_callbacks(QuicCallbacks {
            stream_data: Some(Arc::new(move |peer, stream, data, fin| {
                let mut seen = seen.lock().unwrap();
                seen.bytes += data.len();
                seen.fin |= fin;
                seen.peer = Some(peer.to_string());
                seen.stream = Some(stream);
            })),
            connected: None,
            closed: None,
        });
    }

    let protection: ProtectionFactory =
        Arc::new(|_dcid| Ok(Box::new(NullProtection::default())));
    let server_addr = server
        .start(
            &manager,
            ("127.0.0.1", 0),
            ConnectionConfig::default(),
            protection,
            Arc::new(|| Box::new(ScriptedHandshake::new(tern_core::endpoint::Type::Server))),
        )
        .unwrap();

    let client = QuicClient::new(Duration::from_secs(5));
    let client_received: Arc<Mutex<(Vec<u8>, bool)>> =
        Arc::new(Mutex::new((Vec::new(), false)));
    {
        let client_received = client_received.clone();
        client.set_callbacks(QuicCallbacks {
            stream_data: Some(Arc::new(move |_, _, data, fin| {
                let mut received = client_received.lock().unwrap();
                received.0.extend_from_slice(data);
                received.1 |= fin;
            })),
            connected: None,
            closed: None,
        });
    }

    client
        .connect(
            &manager,
            server_addr,
            ConnectionConfig::default(),
            Box::new(NullProtection::default()),
            Box::new(ScriptedHandshake::new(tern_core::endpoint::Type::Client)),
        )
        .unwrap();

    // a bidirectional stream carrying 1 KiB with FIN
    let stream = client.create_stream(&manager, false).unwrap();
    assert_eq!(stream, 0);
    client
        .send_stream(&manager, stream, &vec![0x42u8; 1024], true)
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            let seen = seen.lock().unwrap();
            seen.bytes == 1024 && seen.fin
        }),
        "the server must observe exactly 1 KiB ending in FIN"
    );

    // the server answers on the same stream
    let (peer, stream_id) = {
        let seen = seen.lock().unwrap();
        (
            seen.peer.clone().unwrap().parse().unwrap(),
            seen.stream.unwrap(),
        )
    };
    assert_eq!(stream_id, stream);
    server
        .send_stream(&manager, peer, stream_id, b"ok", true)
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            let received = client_received.lock().unwrap();
            received.1 && received.0 == b"ok"
        }),
        "the client must observe the response with FIN"
    );

    client.close(0, "done");
    server.stop(&manager);
}
