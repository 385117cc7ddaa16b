// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Path MTU search: a binary search over probe packet sizes, driven by
//! ACK and loss feedback on dedicated probe packets.
//!
//! Probe packets are PING packets of an exact target size sent with the
//! IP don't-fragment flag; they never count toward congestion. The search
//! narrows `[min, max]` until the bounds meet or the probe budget runs
//! out.

use crate::packet::{MAX_UDP_PAYLOAD_SIZE, MIN_INITIAL_SIZE};

/// The smallest payload worth probing for; anything below the QUIC
/// minimum datagram size is already usable
pub const BASE_PROBE_LENGTH: u16 = MIN_INITIAL_SIZE as u16;

/// The payload carried by a standard Ethernet frame after IPv4 and UDP
/// headers; the default search ceiling
pub const DEFAULT_MAX_PROBE_LENGTH: u16 = 1472;

/// Probes attempted before the search settles
pub const DEFAULT_PROBE_COUNT: u8 = 8;

/// Initial spacing, in packets, between probes; doubles after every probe
pub const INITIAL_PACKETS_BETWEEN_PROBES: u64 = 1;

/// Binary-search scheduler for path MTU probes
#[derive(Clone, Debug)]
pub struct Prober {
    min_probe_length: u16,
    max_probe_length: u16,
    last_probe_length: u16,
    /// Packet number (application space) after which the next probe may go
    next_probe_at: u64,
    packets_between_probes: u64,
    remaining_probe_count: u8,
    /// A probe is in flight and awaiting ACK or loss
    in_flight: bool,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new(
            BASE_PROBE_LENGTH,
            DEFAULT_MAX_PROBE_LENGTH,
            DEFAULT_PROBE_COUNT,
        )
    }
}

impl Prober {
    pub fn new(min: u16, max: u16, probe_count: u8) -> Self {
        debug_assert!((max as usize) <= MAX_UDP_PAYLOAD_SIZE);
        Self {
            min_probe_length: min,
            max_probe_length: max,
            last_probe_length: 0,
            next_probe_at: INITIAL_PACKETS_BETWEEN_PROBES + 1,
            packets_between_probes: INITIAL_PACKETS_BETWEEN_PROBES,
            remaining_probe_count: probe_count,
            in_flight: false,
        }
    }

    /// The largest payload size confirmed by an acknowledged probe
    #[inline]
    pub fn confirmed(&self) -> u16 {
        self.min_probe_length
    }

    /// Returns true once the search has converged or exhausted its budget
    #[inline]
    pub fn is_done(&self) -> bool {
        self.min_probe_length >= self.max_probe_length || self.remaining_probe_count == 0
    }

    /// Whether a probe should be sent, given the largest packet number
    /// assigned in the application space
    #[inline]
    pub fn should_probe(&self, largest_sent: u64) -> bool {
        ensure!(!self.in_flight, false);
        ensure!(self.min_probe_length < self.max_probe_length, false);
        ensure!(self.remaining_probe_count > 0, false);
        ensure!(largest_sent >= self.next_probe_at, false);
        true
    }

    #[inline]
    fn next_probe_length(&self) -> u16 {
        let normal = (self.min_probe_length as u32 + self.max_probe_length as u32 + 1) / 2;
        let normal = normal as u16;

        // if the previous probe succeeded and only one attempt remains,
        // spend it on the ceiling
        if self.remaining_probe_count == 1 && normal > self.last_probe_length {
            return self.max_probe_length;
        }

        normal
    }

    /// Picks the size of the next probe and advances the schedule
    ///
    /// Choosing the same size twice in a row means the previous probe of
    /// that size was never acknowledged, so the ceiling drops to it first.
    pub fn update_probe_size(&mut self, largest_sent: u64) -> u16 {
        let probe_length = self.next_probe_length();

        if probe_length == self.last_probe_length {
            self.max_probe_length = probe_length;
        }

        self.last_probe_length = self.next_probe_length();

        self.packets_between_probes *= 2;
        self.next_probe_at = largest_sent + self.packets_between_probes + 1;

        if self.remaining_probe_count > 0 {
            self.remaining_probe_count -= 1;
        }

        self.last_probe_length
    }

    /// Marks the chosen probe as sent and in flight
    #[inline]
    pub fn on_probe_sent(&mut self) {
        self.in_flight = true;
    }

    /// The probe of `probe_length` bytes was acknowledged: the path
    /// carries it, so the floor rises
    ///
    /// The caller publishes the returned value as the new per-datagram
    /// payload ceiling.
    pub fn on_probe_ack(&mut self, probe_length: u16) -> u16 {
        self.min_probe_length = probe_length;
        self.in_flight = false;
        probe_length
    }

    /// The in-flight probe was declared lost; the next attempt re-picks
    /// the same size, which lowers the ceiling through the size-equality
    /// rule in [`Self::update_probe_size`]
    #[inline]
    pub fn on_probe_loss(&mut self) {
        self.in_flight = false;
    }
}
