// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! HKDF-Expand-Label, as defined by TLS 1.3 and reused by QUIC's key
//! schedule.

use ring::hkdf;
use tern_core::crypto::CryptoError;

//= https://www.rfc-editor.org/rfc/rfc8446#section-7.1
//# HKDF-Expand-Label(Secret, Label, Context, Length) =
//#      HKDF-Expand(Secret, HkdfLabel, Length)
//#
//# Where HkdfLabel is specified as:
//#
//# struct {
//#     uint16 length = Length;
//#     opaque label<7..255> = "tls13 " + Label;
//#     opaque context<0..255> = Context;
//# } HkdfLabel;

const PREFIX: &[u8] = b"tls13 ";

struct OutLen(usize);

impl hkdf::KeyType for OutLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// Expands `prk` into `out` under `label` with an empty context
pub fn hkdf_expand_label(
    prk: &hkdf::Prk,
    label: &[u8],
    out: &mut [u8],
) -> Result<(), CryptoError> {
    let length = (out.len() as u16).to_be_bytes();
    let label_len = [(PREFIX.len() + label.len()) as u8];
    let context_len = [0u8];

    let info: [&[u8]; 5] = [&length, &label_len, PREFIX, label, &context_len];

    prk.expand(&info, OutLen(out.len()))
        .and_then(|okm| okm.fill(out))
        .map_err(|_| CryptoError::Internal("hkdf expansion failed"))
}
