// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection identifiers and connection-level errors

use crate::{endpoint, transport, varint::VarInt};
use core::fmt;
use tern_codec::{Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
//# In QUIC version 1, this value MUST NOT exceed 20 bytes.
pub const MAX_ID_LEN: usize = 20;

/// The length tern generates for local connection IDs
pub const LOCAL_ID_LEN: usize = 8;

/// An opaque connection identifier, 0-20 bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id {
    bytes: [u8; MAX_ID_LEN],
    len: u8,
}

impl Id {
    pub const EMPTY: Self = Self {
        bytes: [0; MAX_ID_LEN],
        len: 0,
    };

    /// Creates an ID from a random generator; always [`LOCAL_ID_LEN`] bytes
    #[inline]
    pub fn generate<R: crate::random::Generator>(random: &mut R) -> Self {
        let mut bytes = [0; MAX_ID_LEN];
        random.fill(&mut bytes[..LOCAL_ID_LEN]);
        Self {
            bytes,
            len: LOCAL_ID_LEN as u8,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug)]
pub struct IdError;

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "connection id exceeds 20 bytes")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for IdError {}

impl TryFrom<&[u8]> for Id {
    type Error = IdError;

    #[inline]
    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        if slice.len() > MAX_ID_LEN {
            return Err(IdError);
        }
        let mut bytes = [0; MAX_ID_LEN];
        bytes[..slice.len()].copy_from_slice(slice);
        Ok(Self {
            bytes,
            len: slice.len() as u8,
        })
    }
}

impl AsRef<[u8]> for Id {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x")?;
        for byte in self.as_slice() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl EncoderValue for Id {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(self.as_slice());
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.len()
    }
}

/// Errors that a connection can encounter
#[derive(Clone, Debug, PartialEq, Eq, displaydoc::Display)]
#[non_exhaustive]
pub enum Error {
    /// the connection was closed without an error
    Closed { initiator: endpoint::Location },

    /// the connection was closed at the transport level: {error}
    Transport {
        error: transport::Error,
        initiator: endpoint::Location,
    },

    /// the connection was closed by the application with code {code}
    Application {
        code: VarInt,
        initiator: endpoint::Location,
    },

    /// the idle timer expired
    IdleTimerExpired,

    /// all stream IDs for this connection have been exhausted
    StreamIdExhausted,

    /// the handshake did not complete: {reason}
    HandshakeFailed { reason: &'static str },

    /// the connection was closed for an unspecified reason
    Unspecified,
}

impl Error {
    /// Returns the error code carried in a CONNECTION_CLOSE for this error,
    /// if one is transmitted
    #[inline]
    pub fn close_code(&self) -> Option<VarInt> {
        match self {
            Self::Closed { initiator } if initiator.is_local() => {
                Some(transport::Error::NO_ERROR.code)
            }
            Self::Transport {
                error, initiator, ..
            } if initiator.is_local() => Some(error.code),
            Self::Application { code, initiator } if initiator.is_local() => Some(*code),
            Self::StreamIdExhausted => Some(transport::Error::PROTOCOL_VIOLATION.code),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    #[inline]
    fn from(error: transport::Error) -> Self {
        if error.code == transport::Error::NO_ERROR.code {
            Self::Closed {
                initiator: endpoint::Location::Local,
            }
        } else {
            Self::Transport {
                error,
                initiator: endpoint::Location::Local,
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_round_trip_test() {
        let id = Id::try_from(&[1u8, 2, 3, 4][..]).unwrap();
        assert_eq!(id.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(id.len(), 4);
        assert!(Id::try_from(&[0u8; 21][..]).is_err());
        assert!(Id::try_from(&[][..]).unwrap().is_empty());
    }

    #[test]
    fn close_code_test() {
        let error = Error::from(transport::Error::PROTOCOL_VIOLATION);
        assert_eq!(
            error.close_code(),
            Some(transport::Error::PROTOCOL_VIOLATION.code)
        );
        assert_eq!(Error::IdleTimerExpired.close_code(), None);
    }
}
