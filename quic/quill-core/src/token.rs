// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Address-validation and stateless-reset token generation.
//!
//! Tokens are opaque to the peer; validation of incoming tokens belongs to
//! the ingress collaborator. Both token kinds are keyed HMAC-SHA-256
//! constructions so no per-connection state has to outlive the
//! connection.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::net::SocketAddr;

type HmacSha256 = Hmac<Sha256>;

//= https://www.rfc-editor.org/rfc/rfc9000#section-8.1.3
//# A token issued with NEW_TOKEN MUST NOT include information that would
//# allow values to be linked by an observer to the connection on which it
//# was issued.

/// Lifetime of a token carried in a Retry packet
pub const RETRY_TOKEN_LIFETIME: u64 = 3;

/// Lifetime of a token delivered in a NEW_TOKEN frame
pub const NEW_TOKEN_LIFETIME: u64 = 600;

pub const SR_TOKEN_LEN: usize = 16;

const MAC_LEN: usize = 32;

const TOKEN_KIND_NEW_TOKEN: u8 = 0;
const TOKEN_KIND_RETRY: u8 = 1;

/// Key for address-validation tokens (Retry and NEW_TOKEN)
#[derive(Clone)]
pub struct TokenKey {
    key: [u8; 32],
}

impl TokenKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Builds a token binding the client address, an expiry, and (for
    /// Retry) the client's original destination connection ID
    ///
    /// `expires` is absolute wall-clock seconds supplied by the caller.
    pub fn new_token(&self, addr: &SocketAddr, odcid: Option<&[u8]>, expires: u64) -> Vec<u8> {
        let mut body = Vec::with_capacity(1 + 8 + 16 + 1 + odcid.map_or(0, <[u8]>::len));

        body.push(if odcid.is_some() {
            TOKEN_KIND_RETRY
        } else {
            TOKEN_KIND_NEW_TOKEN
        });
        body.extend_from_slice(&expires.to_be_bytes());

        match addr {
            SocketAddr::V4(v4) => body.extend_from_slice(&v4.ip().octets()),
            SocketAddr::V6(v6) => body.extend_from_slice(&v6.ip().octets()),
        }

        let odcid = odcid.unwrap_or(&[]);
        body.push(odcid.len() as u8);
        body.extend_from_slice(odcid);

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(&body);
        body.extend_from_slice(&mac.finalize().into_bytes());

        body
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-10.3.2
//# An endpoint that wishes to communicate a stateless reset token MUST
//# generate a stateless reset token that is difficult for an attacker to
//# guess.

/// Key for deriving stateless-reset tokens from connection IDs
#[derive(Clone)]
pub struct StatelessResetKey {
    key: [u8; 32],
}

impl StatelessResetKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derives the 16-byte token for `dcid`
    pub fn token(&self, dcid: &[u8]) -> [u8; SR_TOKEN_LEN] {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(dcid);

        let digest = mac.finalize().into_bytes();
        let mut token = [0; SR_TOKEN_LEN];
        token.copy_from_slice(&digest[..SR_TOKEN_LEN]);
        token
    }
}
