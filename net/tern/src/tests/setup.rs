// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the scenario tests

use std::{io::Write, path::PathBuf};

/// Writes a fresh self-signed certificate for `localhost` and returns the
/// (cert, key) paths; the files live until the temp dir is collected
pub fn self_signed_cert_files(tag: &str) -> (PathBuf, PathBuf) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("certificate generation");

    let dir = std::env::temp_dir().join(format!(
        "tern-test-{tag}-{}-{}",
        std::process::id(),
        rand::random::<u32>()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir");

    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");

    let mut cert_file = std::fs::File::create(&cert_path).unwrap();
    cert_file
        .write_all(certified.cert.pem().as_bytes())
        .unwrap();
    let mut key_file = std::fs::File::create(&key_path).unwrap();
    key_file
        .write_all(certified.key_pair.serialize_pem().as_bytes())
        .unwrap();

    (cert_path, key_path)
}

/// Spins until `predicate` holds or the timeout elapses
pub fn wait_until(timeout: std::time::Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    predicate()
}
