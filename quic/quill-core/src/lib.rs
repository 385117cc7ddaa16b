// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Core types for the quill QUIC server egress engine.
//!
//! This crate holds the I/O-free pieces: wire encodings (variable-length
//! integers, packet headers, frames), packet-number truncation, the crypto
//! seams behind which an AEAD implementation plugs in, address-validation
//! and stateless-reset token generation, and the path MTU search state
//! machine. The per-connection send pipeline lives in `quill-egress`; the
//! kernel fast paths live in `quill-platform`.

#[macro_use]
pub mod macros;

pub mod crypto;
pub mod frame;
pub mod io;
pub mod level;
pub mod mtu;
pub mod packet;
pub mod time;
pub mod token;
pub mod varint;

pub use level::Level;
