// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#[macro_use]
pub mod value;
pub mod buffer;

pub use buffer::*;
pub use value::*;

use core::fmt;

/// Error returned when a decoder cannot make progress on untrusted input
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderError {
    /// More bytes were needed than the buffer holds
    UnexpectedEof(usize),
    /// The buffer held bytes beyond the end of the value
    UnexpectedBytes(usize),
    /// A length prefix could not be represented in `usize`
    LengthCapacityExceeded,
    /// A wire-format invariant did not hold
    InvariantViolation(&'static str),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnexpectedEof(len) => write!(f, "unexpected eof: {len}"),
            Self::UnexpectedBytes(len) => write!(f, "unexpected bytes: {len}"),
            Self::LengthCapacityExceeded => {
                write!(f, "length could not be represented in platform's usize type")
            }
            Self::InvariantViolation(msg) => write!(f, "{msg}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecoderError {}

impl From<DecoderError> for &'static str {
    fn from(error: DecoderError) -> Self {
        match error {
            DecoderError::UnexpectedEof(_) => "unexpected eof",
            DecoderError::UnexpectedBytes(_) => "unexpected bytes",
            DecoderError::LengthCapacityExceeded => {
                "length could not be represented in platform's usize type"
            }
            DecoderError::InvariantViolation(msg) => msg,
        }
    }
}

/// Returns a [`DecoderError::InvariantViolation`] unless the expression holds
#[macro_export]
macro_rules! decoder_invariant {
    ($expr:expr, $invariant:expr) => {
        if !($expr) {
            return ::core::result::Result::Err(
                $crate::decoder::DecoderError::InvariantViolation($invariant).into(),
            );
        }
    };
}
