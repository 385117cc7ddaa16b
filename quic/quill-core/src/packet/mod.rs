// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod header;
pub mod number;

pub use header::PacketHeader;

/// QUIC version 1
pub const QUIC_VERSION: u32 = 0x0000_0001;

/// A reserved version advertised in Version Negotiation to exercise peer
/// version handling (RFC 9000 Section 6.3: 0x?a?a?a?a versions are
/// reserved)
pub const GREASE_VERSION: u32 = 0x0a1a_2a3a;

//= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
//# A server MUST expand the payload of all UDP datagrams carrying ack-
//# eliciting Initial packets to at least the smallest allowed maximum
//# datagram size of 1200 bytes.
pub const MIN_INITIAL_SIZE: usize = 1200;

/// The hard per-datagram ceiling: 65535 minus the 8-byte UDP header
pub const MAX_UDP_PAYLOAD_SIZE: usize = 65527;

/// 65K minus an IPv6 header; the largest buffer one GSO submission accepts
pub const MAX_UDP_SEGMENT_BUF: usize = 65487;

/// UDP_MAX_SEGMENTS
pub const MAX_SEGMENTS: usize = 64;

/// Messages submitted in one sendmmsg call
pub const MAX_SENDMMSG: usize = 64;

//= https://www.rfc-editor.org/rfc/rfc9000#section-10.3
//# Endpoints MUST discard packets that are too small to be valid QUIC
//# packets.  With the set of AEAD functions defined in [QUIC-TLS],
//# short header packets that are smaller than 21 bytes are never valid.
pub const MIN_PKT_LEN: usize = 21;

/// 5 random bytes + 16-byte token + 22 bytes of padding headroom
pub const MIN_SR_PACKET: usize = 43;

pub const MAX_SR_PACKET: usize = MIN_INITIAL_SIZE;

/// Default per-datagram ceilings until the path MTU is learned
pub const MAX_UDP_PAYLOAD_OUT: u16 = 1252;
pub const MAX_UDP_PAYLOAD_OUT6: u16 = 1232;

/// Long-header packets carry an explicit Length field which this crate
/// always encodes on two bytes, bounding their ciphertext length
pub const MAX_LONG_HEADER_PACKET: usize = 0x3fff;

/// Server-chosen connection IDs are always this long
pub const SERVER_CID_LEN: usize = 20;
