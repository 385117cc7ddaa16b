// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// Egress configuration; loading it from any particular source is the
/// embedder's business
#[derive(Clone)]
pub struct Config {
    /// Probe for a larger path MTU after each flush
    pub mtu: bool,
    /// Permit the GSO packing strategy
    pub gso_enabled: bool,
    /// Permit the sendmmsg packing strategy
    pub sendmmsg_enabled: bool,
    /// Frames drained from one stream sub-queue before it rotates to the
    /// back of the round-robin
    pub stream_shuffle: u64,
    /// Secret for address-validation tokens (Retry and NEW_TOKEN)
    pub av_token_key: [u8; 32],
    /// Secret for stateless-reset tokens
    pub sr_token_key: [u8; 32],
}

impl Config {
    /// Key handle for Retry and NEW_TOKEN address-validation tokens
    pub fn token_key(&self) -> quill_core::token::TokenKey {
        quill_core::token::TokenKey::new(self.av_token_key)
    }

    /// Key handle for stateless-reset tokens
    pub fn stateless_reset_key(&self) -> quill_core::token::StatelessResetKey {
        quill_core::token::StatelessResetKey::new(self.sr_token_key)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mtu: false,
            gso_enabled: false,
            sendmmsg_enabled: false,
            stream_shuffle: 16,
            av_token_key: [0; 32],
            sr_token_key: [0; 32],
        }
    }
}
