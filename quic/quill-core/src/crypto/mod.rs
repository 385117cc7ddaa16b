// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Seams behind which packet protection plugs in.
//!
//! The TLS handshake and key schedule are collaborators; this crate only
//! consumes ready-to-use per-level keys. The traits mirror what an AEAD
//! provider has to offer: in-place sealing with a trailing tag, and a
//! 5-byte header-protection mask derived from a ciphertext sample.

use crate::Level;
use core::fmt;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
//# The output of this algorithm is a 5-byte mask that is applied to the
//# protected header fields using exclusive OR.
pub const HEADER_PROTECTION_MASK_LEN: usize = 5;
pub type HeaderProtectionMask = [u8; HEADER_PROTECTION_MASK_LEN];

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
//# The Retry Integrity Tag is a 128-bit field that is computed as the
//# output of AEAD_AES_128_GCM used with the following inputs
pub const RETRY_TAG_LEN: usize = 16;

const LONG_HEADER_FORM: u8 = 0x80;
const LONG_HEADER_MASK: u8 = 0x0f;
const SHORT_HEADER_MASK: u8 = 0x1f;

/// A packet-protection failure; fatal to the current `output()` call
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Error {
    reason: &'static str,
}

impl Error {
    pub const SEAL_FAILED: Error = Error {
        reason: "AEAD seal failed",
    };
    pub const MISSING_KEYS: Error = Error {
        reason: "no keys installed for the encryption level",
    };
    pub const SAMPLE_OUT_OF_RANGE: Error = Error {
        reason: "packet too short for a header protection sample",
    };
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "packet protection error: {}", self.reason)
    }
}

impl std::error::Error for Error {}

/// Seals packet payloads at one encryption level
pub trait PacketKey: Send {
    /// Encrypts `payload` in place and appends the authentication tag,
    /// binding the packet number and the unprotected header
    fn seal(&self, packet_number: u64, header: &[u8], payload: &mut Vec<u8>) -> Result<(), Error>;

    /// Length of the appended tag
    fn tag_len(&self) -> usize;
}

/// Derives header-protection masks at one encryption level
pub trait HeaderKey: Send {
    /// Derives the mask used for sealing a packet from a ciphertext sample
    ///
    /// The sample length is determined by the key.
    fn sealing_header_protection_mask(&self, ciphertext_sample: &[u8]) -> HeaderProtectionMask;

    /// Returns the sample size the mask derivation needs
    fn sealing_sample_len(&self) -> usize;
}

/// A packet-protection suite: the key types plus the two derivations the
/// egress path performs on its own (Initial secrets and Retry tags)
pub trait Crypto: 'static + Sized {
    type PacketKey: PacketKey;
    type HeaderKey: HeaderKey;

    /// Derives server Initial keys from the client's destination
    /// connection ID, for the early CONNECTION_CLOSE path
    fn new_initial(dcid: &[u8], version: u32) -> LevelKeys<Self>;

    /// Computes the Retry integrity tag over a pseudo packet
    fn retry_tag(pseudo_packet: &[u8]) -> [u8; RETRY_TAG_LEN];
}

/// The sealing keys of one encryption level
pub struct LevelKeys<C: Crypto> {
    pub packet: C::PacketKey,
    pub header: C::HeaderKey,
}

impl<C: Crypto> fmt::Debug for LevelKeys<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelKeys").finish_non_exhaustive()
    }
}

/// Keys per encryption level; levels without an installed key are skipped
/// by the packer
pub struct KeySet<C: Crypto> {
    keys: [Option<LevelKeys<C>>; Level::COUNT],
}

impl<C: Crypto> fmt::Debug for KeySet<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet").finish_non_exhaustive()
    }
}

impl<C: Crypto> Default for KeySet<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Crypto> KeySet<C> {
    pub fn new() -> Self {
        Self {
            keys: [None, None, None],
        }
    }

    #[inline]
    pub fn get(&self, level: Level) -> Option<&LevelKeys<C>> {
        self.keys[level.index()].as_ref()
    }

    pub fn install(&mut self, level: Level, keys: LevelKeys<C>) {
        self.keys[level.index()] = Some(keys);
    }

    /// Initial keys are discarded once the handshake level is in use
    pub fn discard(&mut self, level: Level) {
        self.keys[level.index()] = None;
    }
}

/// Seals the packet occupying `packet[..]`: `packet` holds the header
/// followed by the plaintext payload, with the packet number at
/// `pn_offset..pn_offset + pn_len`.
///
/// On return the payload is ciphertext, the tag is appended, and header
/// protection is applied. Returns the sealed packet length.
pub fn seal_packet<C: Crypto>(
    keys: &LevelKeys<C>,
    packet_number: u64,
    pn_offset: usize,
    pn_len: usize,
    header_len: usize,
    packet: &mut Vec<u8>,
) -> Result<usize, Error> {
    debug_assert!(pn_offset + pn_len == header_len);

    let mut payload = packet.split_off(header_len);
    keys.packet.seal(packet_number, packet, &mut payload)?;
    packet.append(&mut payload);

    apply_header_protection(&keys.header, pn_offset, pn_len, packet)?;

    Ok(packet.len())
}

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
//# in sampling packet ciphertext for header protection, the Packet Number
//# field is assumed to be 4 bytes long (its maximum possible encoded
//# length).
pub fn apply_header_protection<H: HeaderKey>(
    header_key: &H,
    pn_offset: usize,
    pn_len: usize,
    packet: &mut [u8],
) -> Result<(), Error> {
    let sample_start = pn_offset + 4;
    let sample_end = sample_start + header_key.sealing_sample_len();
    ensure!(packet.len() >= sample_end, Err(Error::SAMPLE_OUT_OF_RANGE));

    let mask = header_key.sealing_header_protection_mask(&packet[sample_start..sample_end]);

    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
    //# pn_length = (packet[0] & 0x03) + 1
    //# if (packet[0] & 0x80) == 0x80:
    //#    # Long header: 4 bits masked
    //#    packet[0] ^= mask[0] & 0x0f
    //# else:
    //#    # Short header: 5 bits masked
    //#    packet[0] ^= mask[0] & 0x1f
    packet[0] ^= mask[0]
        & if packet[0] & LONG_HEADER_FORM == LONG_HEADER_FORM {
            LONG_HEADER_MASK
        } else {
            SHORT_HEADER_MASK
        };

    for (byte, mask_byte) in packet[pn_offset..pn_offset + pn_len]
        .iter_mut()
        .zip(&mask[1..])
    {
        *byte ^= mask_byte;
    }

    Ok(())
}

/// The minimum sealed payload length that keeps the header protection
/// sample inside the packet: `4 - pn_len` plaintext bytes
#[inline]
pub fn min_payload_for_sample(pn_len: usize) -> usize {
    4 - pn_len
}
