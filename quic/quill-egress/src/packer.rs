// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packs sealed packets into datagrams and submits them.
//!
//! Three strategies share one contract: build against staged state, make a
//! single syscall, then either commit (frames move to the in-flight list,
//! bytes count toward congestion and the anti-amplification budget) or
//! revert (queues, packet numbers, and rotation state return to their
//! pre-build snapshot and a short retry timer is armed). A partially
//! accepted `sendmmsg` batch commits exactly the accepted prefix.

use crate::{
    conn::{Connection, PathState, SOCKET_RETRY_DELAY},
    queue::CtxSnapshot,
    Error,
};
use core::mem;
use quill_core::ensure;
use quill_core::{
    crypto::Crypto,
    io::{DatagramWriter, SendResult},
    packet::{MAX_SEGMENTS, MAX_SENDMMSG, MAX_UDP_PAYLOAD_SIZE, MAX_UDP_SEGMENT_BUF, MIN_INITIAL_SIZE},
    time::Timestamp,
    Level,
};

impl<C: Crypto> Connection<C> {
    /// Flushes everything currently sendable, choosing the best permitted
    /// strategy, then arms the idle timer and runs a path MTU probe when
    /// configured.
    ///
    /// The loss-detection timer is re-armed by the recovery collaborator
    /// once this returns.
    pub fn output<W: DatagramWriter>(&mut self, io: &mut W, now: Timestamp) -> Result<(), Error> {
        let in_flight = self.congestion.in_flight;

        self.generate_acks(now);

        if self.allow_segmentation(io) {
            self.create_segments(io, now)?;
        } else if self.allow_sendmmsg(io) {
            self.create_sendmmsg(io, now)?;
        } else {
            self.create_datagrams(io, now)?;
        }

        if in_flight != self.congestion.in_flight
            && self.timers.idle.is_none()
            && !self.close.closing
        {
            self.timers.idle = Some(now + self.tp.max_idle_timeout);
        }

        if self.config.mtu && io.capabilities().mtu_discovery {
            self.mtu_probe(io, now)?;
        }

        Ok(())
    }

    /// Turns deferred ACK flags into queued ACK frames
    fn generate_acks(&mut self, now: Timestamp) {
        for level in Level::ALL {
            if self.ctx(level).ack_pending {
                self.send_ack(level, now);
                self.ctx_mut(level).ack_pending = false;
            }
        }
    }

    /// Per-datagram byte budget: the peer's ceiling, clamped by the
    /// anti-amplification limit on unvalidated paths
    fn datagram_budget(&self) -> usize {
        let len = (self.ctp.max_udp_payload_size as usize).min(MAX_UDP_PAYLOAD_SIZE);

        //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
        //# an endpoint MUST limit the amount of data it sends to the
        //# unvalidated address to three times the amount of data received
        //# from that address.
        if self.path.state != PathState::Validated {
            let budget = (self.path.received * 3).saturating_sub(self.path.sent);
            return len.min(budget);
        }

        len
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
    //# Similarly, a server MUST expand the payload of all UDP datagrams
    //# carrying ack-eliciting Initial packets to at least the smallest
    //# allowed maximum datagram size of 1200 bytes.

    /// The level whose packet absorbs the padding that brings an
    /// Initial-bearing datagram to 1200 bytes: the Handshake packet when
    /// one will be coalesced, otherwise the Initial packet itself
    fn padding_level(&self) -> Option<usize> {
        let initial = &self.send_ctx[Level::Initial.index()];
        ensure!(initial.queue.has_ack_eliciting(), None);

        if self.send_ctx[Level::Handshake.index()].queue.is_empty() {
            Some(Level::Initial.index())
        } else {
            Some(Level::Handshake.index())
        }
    }

    fn snapshot_all(&self) -> [CtxSnapshot; Level::COUNT] {
        [
            self.send_ctx[0].snapshot(),
            self.send_ctx[1].snapshot(),
            self.send_ctx[2].snapshot(),
        ]
    }

    fn revert_all(&mut self, snapshots: &[CtxSnapshot; Level::COUNT], now: Timestamp) {
        for (ctx, snapshot) in self.send_ctx.iter_mut().zip(snapshots) {
            ctx.revert_to(snapshot);
        }
        self.timers.push = Some(now + SOCKET_RETRY_DELAY);
    }

    fn commit_all(&mut self) {
        let Self {
            send_ctx,
            congestion,
            close,
            ..
        } = self;
        for ctx in send_ctx {
            ctx.commit(congestion, close.closing);
        }
    }

    /// Coalesces one packet per sendable level into `dgram`, in
    /// Initial -> Handshake -> Application order
    fn build_datagram(&mut self, dgram: &mut Vec<u8>, now: Timestamp) -> Result<(), Error> {
        let mut len = self.datagram_budget();
        let pad = self.padding_level();

        for level in Level::ALL {
            let i = level.index();

            // a congested level still flushes its priority frames
            if self.congestion.in_flight >= self.congestion.window
                && !self.send_ctx[i].queue.has_priority()
            {
                continue;
            }

            let min = if pad == Some(i) && dgram.len() < MIN_INITIAL_SIZE {
                MIN_INITIAL_SIZE - dgram.len()
            } else {
                0
            };

            if min > len {
                continue;
            }

            let n = self.build_packet(level, dgram, len, min, now)?;
            len -= n;
        }

        Ok(())
    }

    /// The plain strategy: one datagram per `sendmsg`, repeated until the
    /// queues dry up or the socket pushes back
    pub(crate) fn create_datagrams<W: DatagramWriter>(
        &mut self,
        io: &mut W,
        now: Timestamp,
    ) -> Result<(), Error> {
        let mut dgram = mem::take(&mut self.scratch.datagram);

        loop {
            dgram.clear();

            let snapshots = self.snapshot_all();
            self.build_datagram(&mut dgram, now)?;

            if dgram.is_empty() {
                break;
            }

            match io.send(&dgram, self.path.remote, self.path.local)? {
                SendResult::Again => {
                    self.revert_all(&snapshots, now);
                    break;
                }
                SendResult::Sent(_) => {
                    self.commit_all();
                    self.path.sent += dgram.len();
                }
            }
        }

        self.scratch.datagram = dgram;
        Ok(())
    }

    /// GSO admission: configured and available, a validated path, no
    /// pending handshake-level data, and enough application data to make
    /// segmentation worthwhile
    pub(crate) fn allow_segmentation<W: DatagramWriter>(&self, io: &W) -> bool {
        ensure!(self.config.gso_enabled && io.capabilities().gso, false);

        // don't even try to be faster on non-validated paths
        ensure!(self.path.state == PathState::Validated, false);

        ensure!(self.send_ctx[Level::Initial.index()].queue.is_empty(), false);
        ensure!(self.send_ctx[Level::Handshake.index()].queue.is_empty(), false);

        let segment_size = self.segment_size();
        self.send_ctx[Level::Application.index()]
            .queue
            .pending_bytes_reach(segment_size * 3)
    }

    fn segment_size(&self) -> usize {
        (self.ctp.max_udp_payload_size as usize).min(MAX_UDP_SEGMENT_BUF)
    }

    /// The GSO strategy: a train of equal-size Application packets built
    /// back to back and segmented by the kernel
    pub(crate) fn create_segments<W: DatagramWriter>(
        &mut self,
        io: &mut W,
        now: Timestamp,
    ) -> Result<(), Error> {
        let segment_size = self.segment_size();
        let mut buf = mem::take(&mut self.scratch.datagram);
        buf.clear();

        let mut nseg = 0;
        let mut snapshot = self.ctx(Level::Application).snapshot();

        loop {
            let room = MAX_UDP_SEGMENT_BUF - buf.len();
            let len = segment_size.min(room);

            let n = if len > 0
                && (self.congestion.in_flight < self.congestion.window
                    || self.ctx(Level::Application).queue.has_priority())
            {
                // min == max: every segment is exactly `len` bytes
                self.build_packet(Level::Application, &mut buf, len, len, now)?
            } else {
                0
            };

            if n > 0 {
                nseg += 1;
            }

            if buf.is_empty() {
                break;
            }

            if n == 0 || nseg == MAX_SEGMENTS {
                match io.send_segments(&buf, segment_size, self.path.remote, self.path.local)? {
                    SendResult::Again => {
                        self.ctx_mut(Level::Application).revert_to(&snapshot);
                        self.timers.push = Some(now + SOCKET_RETRY_DELAY);
                        break;
                    }
                    SendResult::Sent(_) => {
                        let Self {
                            send_ctx,
                            congestion,
                            close,
                            ..
                        } = self;
                        send_ctx[Level::Application.index()].commit(congestion, close.closing);
                        self.path.sent += buf.len();

                        buf.clear();
                        nseg = 0;
                        snapshot = self.ctx(Level::Application).snapshot();
                    }
                }
            }
        }

        self.scratch.datagram = buf;
        Ok(())
    }

    pub(crate) fn allow_sendmmsg<W: DatagramWriter>(&self, io: &W) -> bool {
        self.config.sendmmsg_enabled && io.capabilities().sendmmsg
    }

    /// The sendmmsg strategy: up to 64 independent datagrams per syscall.
    ///
    /// Each datagram's pre-build state is captured so a partially accepted
    /// batch can commit the accepted prefix and revert the tail exactly.
    pub(crate) fn create_sendmmsg<W: DatagramWriter>(
        &mut self,
        io: &mut W,
        now: Timestamp,
    ) -> Result<(), Error> {
        let mut bufs = mem::take(&mut self.scratch.mmsg);
        bufs.resize_with(MAX_SENDMMSG, Vec::new);

        let mut nseg = 0;
        let mut boundaries: Vec<[CtxSnapshot; Level::COUNT]> = Vec::with_capacity(MAX_SENDMMSG);

        loop {
            bufs[nseg].clear();
            boundaries.push(self.snapshot_all());

            let mut dgram = mem::take(&mut bufs[nseg]);
            let built = self.build_datagram(&mut dgram, now);
            bufs[nseg] = dgram;
            built?;

            let len = bufs[nseg].len();
            if len > 0 {
                nseg += 1;
            } else {
                boundaries.pop();
            }

            if nseg == 0 {
                break;
            }

            if len == 0 || nseg == MAX_SENDMMSG {
                let batch: Vec<&[u8]> = bufs[..nseg].iter().map(|buf| buf.as_slice()).collect();
                let result = io.send_many(&batch, self.path.remote, self.path.local);
                drop(batch);

                match result? {
                    SendResult::Again => {
                        self.revert_all(&boundaries[0], now);
                        break;
                    }
                    SendResult::Sent(accepted) => {
                        let accepted = accepted.min(nseg);

                        if accepted < nseg {
                            // the kernel took only a prefix: rewind the
                            // unsent tail before committing the rest
                            self.revert_all(&boundaries[accepted], now);
                        }

                        self.commit_all();
                        for buf in &bufs[..accepted] {
                            self.path.sent += buf.len();
                        }

                        if accepted < nseg {
                            break;
                        }

                        nseg = 0;
                        boundaries.clear();
                    }
                }
            }
        }

        self.scratch.mmsg = bufs;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::Config,
        conn::{Connection, PathState},
        testing::{Response, StubIo, Submitted},
    };
    use bytes::Bytes;
    use quill_core::{
        crypto::testing::{self, NullCrypto, TAG_LEN},
        frame::{testing as frame_testing, Frame, Payload},
        packet::QUIC_VERSION,
        time::Timestamp,
        Level,
    };
    use std::time::Duration;

    fn new_conn() -> Connection<NullCrypto> {
        let mut conn = Connection::new(
            QUIC_VERSION,
            vec![1; 8],
            vec![2; 20],
            "203.0.113.9:4433".parse().unwrap(),
            Config::default(),
        );
        conn.keys = testing::new_key_set();
        conn.congestion.window = 1 << 20;
        conn
    }

    fn now() -> Timestamp {
        Timestamp::from_millis(500)
    }

    fn crypto_frame(level: Level, len: usize) -> Frame {
        Frame::new(
            level,
            Payload::Crypto {
                offset: 0,
                data: Bytes::from(vec![0x61; len]),
            },
        )
    }

    fn stream_frame(id: u64, offset: u64, len: usize) -> Frame {
        Frame::new(
            Level::Application,
            Payload::Stream {
                id,
                offset,
                fin: false,
                data: Bytes::from(vec![id as u8; len]),
            },
        )
    }

    /// Handshake coalescing: Initial CRYPTO plus Handshake CRYPTO leave in
    /// one 1200-byte datagram, the Handshake packet absorbing the padding
    #[test]
    fn initial_coalescing() {
        let mut conn = new_conn();
        conn.ctp.max_udp_payload_size = 1350;
        conn.path.received = 1200;

        conn.queue_frame(crypto_frame(Level::Initial, 900));
        conn.queue_frame(crypto_frame(Level::Handshake, 150));

        let mut io = StubIo::new();
        conn.create_datagrams(&mut io, now()).unwrap();

        let datagrams = io.datagrams();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].len(), 1200);
        assert_eq!(conn.path.sent, 1200);

        // two long-header packets, Initial first
        assert_eq!(datagrams[0][0] & 0xf0, 0xc0);
        assert_eq!(conn.ctx(Level::Initial).pnum, 1);
        assert_eq!(conn.ctx(Level::Handshake).pnum, 1);
        assert_eq!(conn.ctx(Level::Initial).sent.len(), 1);
        assert_eq!(conn.ctx(Level::Handshake).sent.len(), 1);
    }

    /// The anti-amplification clamp caps the flush at 3x received bytes
    #[test]
    fn anti_amplification_clamp() {
        let mut conn = new_conn();
        conn.ctp.max_udp_payload_size = 1350;
        conn.path.received = 100;

        conn.queue_frame(crypto_frame(Level::Initial, 900));
        conn.queue_frame(crypto_frame(Level::Handshake, 600));

        let mut io = StubIo::new();
        conn.create_datagrams(&mut io, now()).unwrap();

        assert!(conn.path.sent <= 3 * conn.path.received);
        assert_eq!(conn.path.sent, 300);
        assert!(
            conn.ctx(Level::Initial).queue.peek().is_some()
                || conn.ctx(Level::Handshake).queue.peek().is_some(),
            "the remainder stays queued"
        );
    }

    /// P1: whatever is queued, an unvalidated path never exceeds the
    /// amplification budget
    #[test]
    fn amplification_budget_holds() {
        bolero::check!()
            .with_type::<(u16, u16, u8)>()
            .cloned()
            .for_each(|(received, crypto_len, extra)| {
                let mut conn = new_conn();
                conn.path.received = received as usize;
                let mut frame = crypto_frame(Level::Initial, 1 + crypto_len as usize % 4096);
                frame.need_ack = true;
                conn.queue_frame(frame);
                for _ in 0..extra % 4 {
                    conn.queue_frame(crypto_frame(Level::Handshake, 500));
                }

                let mut io = StubIo::new();
                conn.create_datagrams(&mut io, now()).unwrap();

                assert!(conn.path.sent <= 3 * conn.path.received);
            });
    }

    /// P2: a datagram with an ack-eliciting Initial packet is never
    /// smaller than 1200 bytes
    #[test]
    fn initial_datagrams_are_expanded() {
        let mut conn = new_conn();
        conn.path.received = 5000;
        conn.queue_frame(crypto_frame(Level::Initial, 20));

        let mut io = StubIo::new();
        conn.create_datagrams(&mut io, now()).unwrap();

        let datagrams = io.datagrams();
        assert_eq!(datagrams.len(), 1);
        assert!(datagrams[0].len() >= 1200);
    }

    /// Scenario: `AGAIN` reverts the build bit for bit and arms the retry
    /// timer
    #[test]
    fn again_reverts_the_build() {
        let mut conn = new_conn();
        conn.path.state = PathState::Validated;

        for (id, len) in [(1u64, 300), (2, 400), (1, 200)] {
            let offset = if id == 1 && len == 200 { 300 } else { 0 };
            conn.queue_stream_frame(id, stream_frame(id, offset, len));
        }

        let pnum_before = conn.ctx(Level::Application).pnum;
        let in_flight_before = conn.congestion.in_flight;
        let queue_before: Vec<_> = conn
            .ctx(Level::Application)
            .queue
            .frames()
            .map(|frame| frame.payload.clone())
            .collect();

        let mut io = StubIo::new().respond([Response::Again]);
        conn.create_datagrams(&mut io, now()).unwrap();

        let ctx = conn.ctx(Level::Application);
        assert_eq!(ctx.pnum, pnum_before);
        assert_eq!(conn.congestion.in_flight, in_flight_before);
        assert_eq!(ctx.staged_len(), 0);
        let queue_after: Vec<_> = ctx.queue.frames().map(|frame| frame.payload.clone()).collect();
        assert_eq!(queue_after, queue_before);
        assert_eq!(
            conn.timers.push,
            Some(now() + Duration::from_millis(10)),
            "retry timer armed at the socket retry delay"
        );
        assert!(io.datagrams().is_empty());
    }

    /// A committed flush moves ack-eliciting frames into the in-flight
    /// list and counts their packets toward congestion
    #[test]
    fn commit_accounts_in_flight() {
        let mut conn = new_conn();
        conn.path.state = PathState::Validated;
        conn.queue_stream_frame(1, stream_frame(1, 0, 500));

        let mut io = StubIo::new();
        conn.create_datagrams(&mut io, now()).unwrap();

        let sent_bytes: usize = io.datagrams().iter().map(Vec::len).sum();
        assert_eq!(conn.congestion.in_flight, sent_bytes);
        assert_eq!(conn.path.sent, sent_bytes);
        assert_eq!(conn.ctx(Level::Application).sent.len(), 1);
    }

    /// Congestion blocks a level unless it holds priority frames
    #[test]
    fn congestion_lets_priority_frames_through() {
        let mut conn = new_conn();
        conn.path.state = PathState::Validated;
        conn.congestion.window = 0;

        conn.queue_stream_frame(1, stream_frame(1, 0, 500));

        let mut io = StubIo::new();
        conn.create_datagrams(&mut io, now()).unwrap();
        assert!(io.datagrams().is_empty(), "stream data is throttled");

        conn.queue_frame_priority(Frame::new(
            Level::Application,
            Payload::Ack(quill_core::frame::Ack {
                largest: 9,
                delay: 0,
                first_range: 9,
                ranges: vec![],
            }),
        ));

        conn.create_datagrams(&mut io, now()).unwrap();
        let datagrams = io.datagrams();
        assert_eq!(datagrams.len(), 1, "the ACK bypasses the window");
    }

    #[test]
    fn gso_admission_predicates() {
        let io = StubIo::new();
        let mut conn = new_conn();
        conn.config.gso_enabled = true;
        conn.path.state = PathState::Validated;
        conn.ctp.max_udp_payload_size = 1200;
        conn.queue_stream_frame(1, stream_frame(1, 0, 40 * 1024));

        assert!(conn.allow_segmentation(&io));

        conn.config.gso_enabled = false;
        assert!(!conn.allow_segmentation(&io), "disabled by config");
        conn.config.gso_enabled = true;

        conn.path.state = PathState::Waiting;
        assert!(!conn.allow_segmentation(&io), "unvalidated path");
        conn.path.state = PathState::Validated;

        conn.queue_frame(crypto_frame(Level::Handshake, 10));
        assert!(!conn.allow_segmentation(&io), "handshake data pending");
        conn.ctx_mut(Level::Handshake).queue.pop_head(16);
        assert!(conn.allow_segmentation(&io));

        let mut small = new_conn();
        small.config.gso_enabled = true;
        small.path.state = PathState::Validated;
        small.ctp.max_udp_payload_size = 1200;
        small.queue_stream_frame(1, stream_frame(1, 0, 1000));
        assert!(
            !small.allow_segmentation(&io),
            "not enough pending data to batch"
        );
    }

    /// Scenario: 40 KB of application data leaves as one GSO train of
    /// exact-size segments
    #[test]
    fn gso_emission() {
        let mut conn = new_conn();
        conn.config.gso_enabled = true;
        conn.path.state = PathState::Validated;
        conn.ctp.max_udp_payload_size = 1200;
        conn.queue_stream_frame(1, stream_frame(1, 0, 40 * 1024));

        let mut io = StubIo::new();
        conn.output(&mut io, now()).unwrap();

        assert_eq!(io.submitted.len(), 1);
        let Submitted::Segments { buf, segment_size } = &io.submitted[0] else {
            panic!("expected a GSO submission");
        };
        assert_eq!(*segment_size, 1200);
        assert!(buf.len() >= 3 * 1200);
        assert_eq!(buf.len() % 1200, 0, "every segment is exactly one MTU");

        let nseg = buf.len() / 1200;
        assert!(nseg <= 64);
        assert_eq!(conn.ctx(Level::Application).pnum as usize, nseg);
        assert_eq!(conn.path.sent, buf.len());

        // every segment parses as a standalone short-header packet
        for (i, segment) in buf.chunks(1200).enumerate() {
            assert_eq!(segment[0] & 0xc0, 0x40, "segment {i} header");
            let header_len = 1 + 8 + 1;
            let frames =
                frame_testing::decode_all(&segment[header_len..segment.len() - TAG_LEN]).unwrap();
            assert!(!frames.is_empty());
        }
    }

    #[test]
    fn gso_again_reverts_the_train() {
        let mut conn = new_conn();
        conn.config.gso_enabled = true;
        conn.path.state = PathState::Validated;
        conn.ctp.max_udp_payload_size = 1200;
        conn.queue_stream_frame(1, stream_frame(1, 0, 8 * 1024));

        let mut io = StubIo::new().respond([Response::Again]);
        conn.output(&mut io, now()).unwrap();

        assert_eq!(conn.ctx(Level::Application).pnum, 0);
        assert_eq!(conn.congestion.in_flight, 0);
        assert!(conn.timers.push.is_some());
    }

    /// sendmmsg submits independent datagrams in one batch
    #[test]
    fn sendmmsg_batches() {
        let mut conn = new_conn();
        conn.config.sendmmsg_enabled = true;
        conn.path.state = PathState::Validated;
        conn.ctp.max_udp_payload_size = 1200;
        conn.queue_stream_frame(1, stream_frame(1, 0, 5000));

        let mut io = StubIo::new();
        conn.output(&mut io, now()).unwrap();

        assert_eq!(io.submitted.len(), 1);
        let Submitted::Many(bufs) = &io.submitted[0] else {
            panic!("expected a sendmmsg submission");
        };
        assert!(bufs.len() > 1);
        assert!(bufs.iter().all(|buf| buf.len() <= 1200));
        assert_eq!(conn.path.sent, bufs.iter().map(Vec::len).sum::<usize>());
        assert_eq!(conn.ctx(Level::Application).pnum as usize, bufs.len());
    }

    /// A partially accepted batch commits the accepted prefix and reverts
    /// the tail
    #[test]
    fn sendmmsg_partial_commit() {
        let mut conn = new_conn();
        conn.config.sendmmsg_enabled = true;
        conn.path.state = PathState::Validated;
        conn.ctp.max_udp_payload_size = 1200;
        conn.queue_stream_frame(1, stream_frame(1, 0, 5000));

        let mut io = StubIo::new().respond([Response::Partial(2)]);
        conn.output(&mut io, now()).unwrap();

        let Submitted::Many(bufs) = &io.submitted[0] else {
            panic!("expected a sendmmsg submission");
        };
        assert_eq!(bufs.len(), 2);

        // only the accepted prefix advanced state
        assert_eq!(conn.ctx(Level::Application).pnum, 2);
        assert_eq!(conn.path.sent, bufs.iter().map(Vec::len).sum::<usize>());
        assert_eq!(conn.ctx(Level::Application).sent.len(), 2);
        assert!(
            conn.ctx(Level::Application).queue.peek().is_some(),
            "the tail went back to the queue"
        );
        assert!(conn.timers.push.is_some(), "retry armed for the tail");

        // the requeued tail picks up where the prefix left off
        let Payload::Stream { offset, .. } = conn
            .ctx(Level::Application)
            .queue
            .peek()
            .unwrap()
            .payload
            .clone()
        else {
            panic!("expected the stream remainder");
        };
        let committed: usize = conn
            .ctx(Level::Application)
            .sent
            .iter()
            .map(|frame| match &frame.payload {
                Payload::Stream { data, .. } => data.len(),
                _ => 0,
            })
            .sum();
        assert_eq!(offset as usize, committed);
    }

    /// A closing connection still flushes but frees committed frames
    #[test]
    fn closing_connection_frees_on_commit() {
        let mut conn = new_conn();
        conn.path.state = PathState::Validated;
        conn.close.closing = true;
        conn.queue_frame(Frame::new(
            Level::Application,
            Payload::ConnectionClose {
                app: false,
                error_code: 2,
                frame_type: 0,
                reason: Bytes::from_static(b"internal error"),
            },
        ));

        let mut io = StubIo::new();
        conn.create_datagrams(&mut io, now()).unwrap();

        assert_eq!(io.datagrams().len(), 1);
        assert!(conn.ctx(Level::Application).sent.is_empty());
        assert_eq!(conn.congestion.in_flight, 0);
    }

    /// The idle timer arms when new data enters flight
    #[test]
    fn output_arms_the_idle_timer() {
        let mut conn = new_conn();
        conn.path.state = PathState::Validated;
        conn.queue_stream_frame(1, stream_frame(1, 0, 100));

        let mut io = StubIo::new();
        conn.output(&mut io, now()).unwrap();

        assert_eq!(conn.timers.idle, Some(now() + conn.tp.max_idle_timeout));
    }
}
