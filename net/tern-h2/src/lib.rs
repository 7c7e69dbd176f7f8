// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP/2 binary framing.
//!
//! A bit-exact codec for the 9-byte frame header and the payload layouts of
//! DATA, HEADERS, SETTINGS, RST_STREAM, PING, GOAWAY, and WINDOW_UPDATE.
//! Every wire violation surfaces as a [`FrameError`]; nothing is silently
//! accepted.

#![forbid(unsafe_code)]

pub mod error;
pub mod frames;
pub mod header;

pub use error::FrameError;
pub use frames::{Data, Frame, GoAway, Headers, Ping, RstStream, Settings, WindowUpdate};
pub use header::{FrameHeader, FrameType, FRAME_HEADER_LEN, MAX_FRAME_LEN};
