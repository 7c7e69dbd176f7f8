// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A flooding peer is disconnected at the inbox hard watermark

use crate::{
    tests::setup::wait_until,
    ClientConfig, MessagingClient, MessagingServer, ReactorManager, ServerConfig, SessionLimits,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

#[test]
fn backpressure_disconnect_test() {
    let manager = ReactorManager::new().unwrap();

    let server = Arc::new(MessagingServer::new(
        ServerConfig::default().with_session_limits(SessionLimits {
            soft_limit: 10,
            hard_limit: 20,
        }),
    ));

    // the receive callback never yields, so no inbox entry is consumed
    // while the flood arrives
    server.callbacks().set_receive(move |_, _| {
        std::thread::sleep(Duration::from_secs(30));
    });

    let disconnects = Arc::new(AtomicUsize::new(0));
    {
        let disconnects = disconnects.clone();
        server.callbacks().set_disconnect(move |_| {
            disconnects.fetch_add(1, Ordering::SeqCst);
        });
    }

    let addr = server.start(&manager).unwrap();

    let client = MessagingClient::new(ClientConfig::new("127.0.0.1", addr.port()));
    client.connect(&manager).unwrap();

    // 25 payloads of 64 bytes, as fast as possible
    for _ in 0..25 {
        // the server may cut the connection mid-flood; that is the point
        let _ = client.send(&[0u8; 64]);
    }

    assert!(
        wait_until(Duration::from_secs(10), || {
            disconnects.load(Ordering::SeqCst) == 1
        }),
        "the session must be disconnected as abusive"
    );

    server.stop(&manager);
}
