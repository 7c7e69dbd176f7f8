// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! QUIC transport error codes

use crate::varint::VarInt;
use core::fmt;

/// A transport-level error, carried in CONNECTION_CLOSE frames
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error {
    /// The wire error code
    pub code: VarInt,
    /// A static description of the error; not transmitted losslessly
    pub reason: &'static str,
}

macro_rules! transport_errors {
    ($($(#[doc = $doc:literal])* $name:ident = $code:literal;)*) => {
        impl Error {
            $(
                $(#[doc = $doc])*
                pub const $name: Self = Self {
                    code: VarInt::from_u8($code),
                    reason: "",
                };
            )*

            /// Returns the wire-format name of the error code, if known
            pub fn description(&self) -> Option<&'static str> {
                match self.code.as_u64() {
                    $(
                        $code => Some(stringify!($name)),
                    )*
                    _ => None,
                }
            }
        }
    };
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-20.1
transport_errors! {
    /// The connection is being closed abruptly in the absence of any error
    NO_ERROR = 0x00;
    /// The endpoint encountered an internal error
    INTERNAL_ERROR = 0x01;
    /// The server refused to accept a new connection
    CONNECTION_REFUSED = 0x02;
    /// Flow control limits were exceeded
    FLOW_CONTROL_ERROR = 0x03;
    /// Too many streams were opened
    STREAM_LIMIT_ERROR = 0x04;
    /// A frame was received for a stream in the wrong state
    STREAM_STATE_ERROR = 0x05;
    /// The final size of a stream changed
    FINAL_SIZE_ERROR = 0x06;
    /// A frame could not be parsed
    FRAME_ENCODING_ERROR = 0x07;
    /// Transport parameters were malformed
    TRANSPORT_PARAMETER_ERROR = 0x08;
    /// Connection ID limits were violated
    CONNECTION_ID_LIMIT_ERROR = 0x09;
    /// A general protocol violation was detected
    PROTOCOL_VIOLATION = 0x0a;
    /// An invalid address validation token was received
    INVALID_TOKEN = 0x0b;
    /// The application caused the connection to close
    APPLICATION_ERROR = 0x0c;
    /// The amount of buffered CRYPTO data was exceeded
    CRYPTO_BUFFER_EXCEEDED = 0x0d;
    /// A key update could not be performed
    KEY_UPDATE_ERROR = 0x0e;
    /// Too many packets were protected under a single key
    AEAD_LIMIT_REACHED = 0x0f;
    /// No viable network path exists
    NO_VIABLE_PATH = 0x10;
}

impl Error {
    /// Attaches a static reason to the error
    #[inline]
    #[must_use]
    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }

    /// Creates an error from an arbitrary wire code
    #[inline]
    pub const fn new(code: VarInt) -> Self {
        Self { code, reason: "" }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(description) = self.description() {
            write!(f, "{description}")?;
        } else {
            write!(f, "error {}", self.code)?;
        }
        if !self.reason.is_empty() {
            write!(f, ": {}", self.reason)?;
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_test() {
        assert_eq!(Error::NO_ERROR.description(), Some("NO_ERROR"));
        assert_eq!(
            Error::PROTOCOL_VIOLATION.description(),
            Some("PROTOCOL_VIOLATION")
        );
        assert_eq!(Error::new(VarInt::from_u16(0x4242)).description(), None);
    }
}
