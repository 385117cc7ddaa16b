// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-connection egress state.
//!
//! The transport state machine, stream layer, TLS handshake, and loss
//! detector are collaborators: they install keys, enqueue frames, update
//! `largest_ack` and the congestion window, and consume the timers this
//! module arms. The fields they touch are public; the packing machinery
//! stays internal.

use crate::{config::Config, queue::SendCtx};
use core::time::Duration;
use quill_core::{
    crypto::{Crypto, KeySet},
    mtu,
    packet::{MAX_UDP_PAYLOAD_OUT, MAX_UDP_PAYLOAD_OUT6, MAX_UDP_PAYLOAD_SIZE},
    time::Timestamp,
    Level,
};
use std::net::SocketAddr;

/// Delay before retrying a send that hit transient back-pressure
pub const SOCKET_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Minimum interval between CONNECTION_CLOSE retransmissions while
/// closing
pub const CC_MIN_INTERVAL: Duration = Duration::from_millis(1000);

/// Bytes-based congestion state maintained by the recovery collaborator
#[derive(Copy, Clone, Debug)]
pub struct Congestion {
    pub window: usize,
    pub in_flight: usize,
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
//# an endpoint MUST limit the amount of data it sends to the unvalidated
//# address to three times the amount of data received from that address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PathState {
    New,
    /// A PATH_CHALLENGE is outstanding
    Waiting,
    Validated,
}

/// The network path of this connection, with the anti-amplification
/// counters
#[derive(Clone, Debug)]
pub struct Path {
    pub remote: SocketAddr,
    /// Pinned source address when the listening socket is a wildcard
    pub local: Option<SocketAddr>,
    pub state: PathState,
    /// Bytes received from the peer on this path
    pub received: usize,
    /// Bytes sent to the peer on this path
    pub sent: usize,
}

impl Path {
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            remote,
            local: None,
            state: PathState::New,
            received: 0,
            sent: 0,
        }
    }

    /// Default per-datagram ceiling for the address family, used until a
    /// larger MTU is learned
    pub fn default_max_udp_payload(&self) -> u16 {
        match self.remote {
            SocketAddr::V4(_) => MAX_UDP_PAYLOAD_OUT,
            SocketAddr::V6(_) => MAX_UDP_PAYLOAD_OUT6,
        }
    }
}

/// The transport-parameter subset the egress path reads
#[derive(Copy, Clone, Debug)]
pub struct TransportParams {
    /// Hard per-datagram ceiling; capped at 65527
    pub max_udp_payload_size: u16,
    pub max_idle_timeout: Duration,
    pub ack_delay_exponent: u8,
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            max_udp_payload_size: MAX_UDP_PAYLOAD_SIZE as u16,
            max_idle_timeout: Duration::from_secs(30),
            ack_delay_exponent: 3,
        }
    }
}

/// Timers owned by the egress path; the event loop reads and fires them.
/// The loss-detection timer belongs to the recovery collaborator.
#[derive(Copy, Clone, Debug, Default)]
pub struct Timers {
    /// Retry a reverted send
    pub push: Option<Timestamp>,
    /// Idle timeout armed when new data went into flight
    pub idle: Option<Timestamp>,
}

/// Termination state
#[derive(Clone, Debug)]
pub struct CloseState {
    pub closing: bool,
    pub draining: bool,
    pub error: u64,
    /// Application-variant CONNECTION_CLOSE (type 0x1d)
    pub error_app: bool,
    pub error_ftype: u64,
    /// Level the CONNECTION_CLOSE frame goes out at
    pub error_level: Level,
    pub error_reason: Option<String>,
    pub last_cc: Option<Timestamp>,
}

impl Default for CloseState {
    fn default() -> Self {
        Self {
            closing: false,
            draining: false,
            error: 0,
            error_app: false,
            error_ftype: 0,
            error_level: Level::Initial,
            error_reason: None,
            last_cc: None,
        }
    }
}

/// Reusable build buffers owned by the connection, so packing never
/// touches shared statics
#[derive(Debug, Default)]
pub(crate) struct Scratch {
    /// Plaintext payload of the packet being built
    pub payload: Vec<u8>,
    /// The packet being sealed
    pub packet: Vec<u8>,
    /// The datagram being assembled (plain strategy) or the segment train
    /// (GSO strategy)
    pub datagram: Vec<u8>,
    /// Independent datagram buffers for sendmmsg, recycled between rounds
    pub mmsg: Vec<Vec<u8>>,
}

/// Server-side egress state of one QUIC connection
pub struct Connection<C: Crypto> {
    pub version: u32,
    /// Peer-chosen destination CID for this path
    pub dcid: Vec<u8>,
    /// Local source CID
    pub scid: Vec<u8>,
    pub keys: KeySet<C>,
    pub key_phase: bool,
    /// Local transport parameters
    pub tp: TransportParams,
    /// Peer transport parameters
    pub ctp: TransportParams,
    pub congestion: Congestion,
    pub path: Path,
    pub mtu: mtu::Prober,
    pub close: CloseState,
    pub timers: Timers,
    pub config: Config,
    pub(crate) send_ctx: [SendCtx; Level::COUNT],
    pub(crate) scratch: Scratch,
}

impl<C: Crypto> Connection<C> {
    pub fn new(version: u32, dcid: Vec<u8>, scid: Vec<u8>, remote: SocketAddr, config: Config) -> Self {
        Self {
            version,
            dcid,
            scid,
            keys: KeySet::new(),
            key_phase: false,
            tp: TransportParams::default(),
            ctp: TransportParams::default(),
            congestion: Congestion {
                window: 10 * 1200,
                in_flight: 0,
            },
            path: Path::new(remote),
            mtu: mtu::Prober::default(),
            close: CloseState::default(),
            timers: Timers::default(),
            config,
            send_ctx: [
                SendCtx::new(Level::Initial),
                SendCtx::new(Level::Handshake),
                SendCtx::new(Level::Application),
            ],
            scratch: Scratch::default(),
        }
    }

    #[inline]
    pub fn ctx(&self, level: Level) -> &SendCtx {
        &self.send_ctx[level.index()]
    }

    #[inline]
    pub fn ctx_mut(&mut self, level: Level) -> &mut SendCtx {
        &mut self.send_ctx[level.index()]
    }

    /// Hands a frame to its level's default sub-queue
    pub fn queue_frame(&mut self, frame: quill_core::frame::Frame) {
        self.ctx_mut(frame.level).queue.push(frame);
    }

    /// Queues ahead of everything except earlier priority frames
    pub fn queue_frame_priority(&mut self, frame: quill_core::frame::Frame) {
        self.ctx_mut(frame.level).queue.push_priority(frame);
    }

    /// Queues on the round-robin sub-queue of `stream_id`
    pub fn queue_stream_frame(&mut self, stream_id: u64, frame: quill_core::frame::Frame) {
        self.ctx_mut(frame.level).queue.push_stream(stream_id, frame);
    }
}
