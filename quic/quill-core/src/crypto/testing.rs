// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A null packet-protection suite with real AEAD geometry.
//!
//! Payloads pass through unchanged, tags are 16 zero bytes, and the
//! header-protection mask is zero, so sealed packets have the same sizes
//! as production packets while staying trivially inspectable in tests.

use crate::crypto::{
    Crypto, Error, HeaderKey as HeaderKeyTrait, HeaderProtectionMask, KeySet, LevelKeys, PacketKey,
    RETRY_TAG_LEN,
};
use crate::Level;

pub const TAG_LEN: usize = 16;
pub const SAMPLE_LEN: usize = 16;

#[derive(Debug)]
pub struct NullCrypto;

#[derive(Debug, Default)]
pub struct Key {
    /// Set to force a sealing failure
    pub fail_on_seal: bool,
}

impl PacketKey for Key {
    fn seal(&self, _packet_number: u64, _header: &[u8], payload: &mut Vec<u8>) -> Result<(), Error> {
        if self.fail_on_seal {
            return Err(Error::SEAL_FAILED);
        }
        payload.extend_from_slice(&[0; TAG_LEN]);
        Ok(())
    }

    fn tag_len(&self) -> usize {
        TAG_LEN
    }
}

#[derive(Debug, Default)]
pub struct HeaderKey;

impl HeaderKeyTrait for HeaderKey {
    fn sealing_header_protection_mask(&self, _ciphertext_sample: &[u8]) -> HeaderProtectionMask {
        [0; 5]
    }

    fn sealing_sample_len(&self) -> usize {
        SAMPLE_LEN
    }
}

impl Crypto for NullCrypto {
    type PacketKey = Key;
    type HeaderKey = HeaderKey;

    fn new_initial(_dcid: &[u8], _version: u32) -> LevelKeys<Self> {
        new_keys()
    }

    fn retry_tag(_pseudo_packet: &[u8]) -> [u8; RETRY_TAG_LEN] {
        [0; RETRY_TAG_LEN]
    }
}

pub fn new_keys() -> LevelKeys<NullCrypto> {
    LevelKeys {
        packet: Key::default(),
        header: HeaderKey::default(),
    }
}

/// A key set with null keys installed at every level
pub fn new_key_set() -> KeySet<NullCrypto> {
    let mut keys = KeySet::new();
    for level in Level::ALL {
        keys.install(level, new_keys());
    }
    keys
}
