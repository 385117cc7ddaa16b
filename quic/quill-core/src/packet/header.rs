// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    crypto::Crypto,
    packet::{number::TruncatedPacketNumber, GREASE_VERSION, MAX_LONG_HEADER_PACKET},
    varint, Level,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
//# Long Header Packet {
//#   Header Form (1) = 1,
//#   Fixed Bit (1) = 1,
//#   Long Packet Type (2),
//#   Type-Specific Bits (4),
//#   Version (32),
//#   Destination Connection ID Length (8),
//#   Destination Connection ID (0..160),
//#   Source Connection ID Length (8),
//#   Source Connection ID (0..160),
//#   Type-Specific Payload (..),
//# }

pub const FORM_LONG: u8 = 0x80;
pub const FIXED_BIT: u8 = 0x40;

pub const LONG_TYPE_INITIAL: u8 = 0x00;
pub const LONG_TYPE_HANDSHAKE: u8 = 0x20;
pub const LONG_TYPE_RETRY: u8 = 0x30;

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.3.1
//# 1-RTT Packet {
//#   Header Form (1) = 0,
//#   Fixed Bit (1) = 1,
//#   Spin Bit (1),
//#   Reserved Bits (2),
//#   Key Phase (1),
//#   Packet Number Length (2),
//#   Destination Connection ID (0..160),
//#   Packet Number (8..32),
//#   Packet Payload (8..),
//# }

pub const KEY_PHASE: u8 = 0x04;

/// The unprotected header of one outgoing packet
#[derive(Debug)]
pub struct PacketHeader<'a> {
    pub level: Level,
    pub version: u32,
    pub dcid: &'a [u8],
    pub scid: &'a [u8],
    /// Initial packets only; empty for a server that did not receive a token
    pub token: &'a [u8],
    pub key_phase: bool,
    pub pn: TruncatedPacketNumber,
}

impl PacketHeader<'_> {
    /// Number of header bytes on the wire, packet number included
    ///
    /// The long-header Length field is always encoded on two bytes, so the
    /// size does not depend on the payload length.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        match self.level {
            Level::Initial => {
                1 + 4
                    + 1
                    + self.dcid.len()
                    + 1
                    + self.scid.len()
                    + varint::size_of(self.token.len() as u64)
                    + self.token.len()
                    + 2
                    + self.pn.len()
            }
            Level::Handshake => 1 + 4 + 1 + self.dcid.len() + 1 + self.scid.len() + 2 + self.pn.len(),
            Level::Application => 1 + self.dcid.len() + self.pn.len(),
        }
    }

    /// Appends the header to `buf` and returns the offset of the packet
    /// number field relative to the start of the header
    ///
    /// `payload_len` is the ciphertext length that will follow the packet
    /// number, AEAD tag included; it feeds the long-header Length field.
    pub fn encode(&self, payload_len: usize, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();

        match self.level {
            Level::Initial | Level::Handshake => {
                let type_bits = if self.level == Level::Initial {
                    LONG_TYPE_INITIAL
                } else {
                    LONG_TYPE_HANDSHAKE
                };
                buf.push(FORM_LONG | FIXED_BIT | type_bits | self.pn.flag_bits());
                buf.extend_from_slice(&self.version.to_be_bytes());
                buf.push(self.dcid.len() as u8);
                buf.extend_from_slice(self.dcid);
                buf.push(self.scid.len() as u8);
                buf.extend_from_slice(self.scid);

                if self.level == Level::Initial {
                    varint::encode(self.token.len() as u64, buf);
                    buf.extend_from_slice(self.token);
                }

                let length = self.pn.len() + payload_len;
                debug_assert!(length <= MAX_LONG_HEADER_PACKET);
                buf.extend_from_slice(&(length as u16 | 0x4000).to_be_bytes());
            }
            Level::Application => {
                let mut flags = FIXED_BIT | self.pn.flag_bits();
                if self.key_phase {
                    flags |= KEY_PHASE;
                }
                buf.push(flags);
                buf.extend_from_slice(self.dcid);
            }
        }

        let pn_offset = buf.len() - start;
        self.pn.encode(buf);
        pn_offset
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.1
//# Version Negotiation Packet {
//#   Header Form (1) = 1,
//#   Unused (7),
//#   Version (32) = 0,
//#   Destination Connection ID Length (8),
//#   Destination Connection ID (0..2040),
//#   Source Connection ID Length (8),
//#   Source Connection ID (0..2040),
//#   Supported Version (32) ...,
//# }

/// Encodes a Version Negotiation packet advertising QUIC v1 plus a greased
/// reserved version
pub fn encode_version_negotiation(dcid: &[u8], scid: &[u8], versions: &[u32], buf: &mut Vec<u8>) {
    buf.push(FORM_LONG | FIXED_BIT);
    buf.extend_from_slice(&0u32.to_be_bytes());
    buf.push(dcid.len() as u8);
    buf.extend_from_slice(dcid);
    buf.push(scid.len() as u8);
    buf.extend_from_slice(scid);

    for version in versions {
        buf.extend_from_slice(&version.to_be_bytes());
    }
    buf.extend_from_slice(&GREASE_VERSION.to_be_bytes());
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5
//# Retry Packet {
//#   Header Form (1) = 1,
//#   Fixed Bit (1) = 1,
//#   Long Packet Type (2) = 3,
//#   Unused (4),
//#   Version (32),
//#   Destination Connection ID Length (8),
//#   Destination Connection ID (0..160),
//#   Source Connection ID Length (8),
//#   Source Connection ID (0..160),
//#   Retry Token (..),
//#   Retry Integrity Tag (128),
//# }

/// Encodes a Retry packet, computing the integrity tag over the pseudo
/// packet prefixed with the client's original DCID (RFC 9001 Section 5.8)
pub fn encode_retry<C: Crypto>(
    version: u32,
    dcid: &[u8],
    scid: &[u8],
    odcid: &[u8],
    token: &[u8],
    buf: &mut Vec<u8>,
) {
    let mut pseudo = Vec::with_capacity(1 + odcid.len() + 7 + dcid.len() + scid.len() + token.len());
    pseudo.push(odcid.len() as u8);
    pseudo.extend_from_slice(odcid);

    pseudo.push(FORM_LONG | FIXED_BIT | LONG_TYPE_RETRY);
    pseudo.extend_from_slice(&version.to_be_bytes());
    pseudo.push(dcid.len() as u8);
    pseudo.extend_from_slice(dcid);
    pseudo.push(scid.len() as u8);
    pseudo.extend_from_slice(scid);
    pseudo.extend_from_slice(token);

    let tag = C::retry_tag(&pseudo);

    buf.extend_from_slice(&pseudo[1 + odcid.len()..]);
    buf.extend_from_slice(&tag);
}
