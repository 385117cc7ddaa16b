// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wires the MTU search to the connection: probe emission after a flush,
//! and the ACK/loss entry points the recovery collaborator calls.

use crate::{conn::Connection, Error};
use quill_core::ensure;
use quill_core::{
    crypto::Crypto,
    frame::{Frame, Payload},
    io::DatagramWriter,
    time::Timestamp,
    Level,
};

impl<C: Crypto> Connection<C> {
    /// Sends one path MTU probe if the search wants one: a lone PING in a
    /// packet of exactly the probe size, with don't-fragment set.
    ///
    /// Probe packets never count toward congestion.
    pub fn mtu_probe<W: DatagramWriter>(
        &mut self,
        io: &mut W,
        now: Timestamp,
    ) -> Result<bool, Error> {
        let pnum = self.ctx(Level::Application).pnum;
        ensure!(self.mtu.should_probe(pnum), Ok(false));

        let len = self.mtu.update_probe_size(pnum);

        let mut frame = Frame::new(Level::Application, Payload::Ping);
        frame.flush = true;
        frame.probe = true;

        let frame = self.frame_sendto(io, frame, len as usize, now, true)?;

        self.mtu.on_probe_sent();
        self.ctx_mut(Level::Application).sent.push_back(frame);

        tracing::debug!(len, "mtu probe sent");
        Ok(true)
    }

    /// The probe carrying `frame` was acknowledged: adopt its size as the
    /// new per-datagram payload ceiling
    pub fn mtu_ack(&mut self, frame: &Frame) {
        ensure!(frame.probe);

        let mtu = self.mtu.on_probe_ack(frame.plen as u16);
        self.ctp.max_udp_payload_size = mtu;

        tracing::debug!(mtu, "mtu probe acknowledged");
    }

    /// The probe carrying `frame` was declared lost; the search narrows
    /// on the next attempt
    pub fn mtu_lost(&mut self, frame: &Frame) {
        ensure!(frame.probe);
        self.mtu.on_probe_loss();
        tracing::debug!(len = frame.plen, "mtu probe lost");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        testing::{StubIo, Submitted},
    };
    use quill_core::{
        crypto::testing::{self, NullCrypto},
        mtu,
        packet::QUIC_VERSION,
    };

    fn new_conn() -> Connection<NullCrypto> {
        let mut conn = Connection::new(
            QUIC_VERSION,
            vec![1; 8],
            vec![2; 20],
            "203.0.113.9:4433".parse().unwrap(),
            Config {
                mtu: true,
                ..Config::default()
            },
        );
        conn.keys = testing::new_key_set();
        conn.congestion.window = 1 << 20;
        conn
    }

    fn now() -> Timestamp {
        Timestamp::from_millis(250)
    }

    #[test]
    fn probe_is_an_exact_size_ping() {
        let mut conn = new_conn();
        conn.mtu = mtu::Prober::new(1200, 1500, 8);
        conn.ctx_mut(Level::Application).pnum = 5;

        let mut io = StubIo::new();
        assert!(conn.mtu_probe(&mut io, now()).unwrap());

        let Submitted::DontFragment(pkt) = &io.submitted[0] else {
            panic!("probes must set don't-fragment");
        };
        assert_eq!(pkt.len(), 1350, "first probe bisects [1200, 1500]");

        let probe = conn.ctx(Level::Application).sent.back().unwrap();
        assert!(probe.probe);
        assert!(probe.need_ack);
        assert!(probe.flush);
        assert_eq!(probe.plen, 1350);

        // only one probe in flight at a time
        assert!(!conn.mtu_probe(&mut io, now()).unwrap());
        assert_eq!(io.submitted.len(), 1);
    }

    #[test]
    fn probe_does_not_enter_congestion_accounting() {
        let mut conn = new_conn();
        conn.mtu = mtu::Prober::new(1200, 1500, 8);
        conn.ctx_mut(Level::Application).pnum = 5;

        let mut io = StubIo::new();
        conn.mtu_probe(&mut io, now()).unwrap();

        assert_eq!(conn.congestion.in_flight, 0);
    }

    #[test]
    fn ack_publishes_the_new_ceiling() {
        let mut conn = new_conn();
        conn.mtu = mtu::Prober::new(1200, 1500, 8);
        conn.ctx_mut(Level::Application).pnum = 5;

        let mut io = StubIo::new();
        conn.mtu_probe(&mut io, now()).unwrap();

        let probe = conn.ctx_mut(Level::Application).sent.pop_back().unwrap();
        conn.mtu_ack(&probe);

        assert_eq!(conn.ctp.max_udp_payload_size, 1350);
        assert_eq!(conn.mtu.confirmed(), 1350);
    }

    /// End to end: a path carrying 1350 bytes converges from [1200, 1500]
    /// within the probe budget, and the connection adopts the result
    #[test]
    fn search_converges_against_the_path() {
        const PATH_MTU: usize = 1350;

        let mut conn = new_conn();
        conn.ctp.max_udp_payload_size = 1200;
        conn.mtu = mtu::Prober::new(1200, 1500, 8);

        let mut io = StubIo::new();
        let mut ceiling_raised = false;

        for round in 0..2000u64 {
            conn.ctx_mut(Level::Application).pnum += 1;

            if conn.mtu_probe(&mut io, now()).unwrap() {
                let Submitted::DontFragment(pkt) = io.submitted.last().unwrap() else {
                    panic!("probes must set don't-fragment");
                };
                let size = pkt.len();
                let probe = conn.ctx_mut(Level::Application).sent.pop_back().unwrap();

                if size <= PATH_MTU {
                    conn.mtu_ack(&probe);
                    ceiling_raised |= conn.ctp.max_udp_payload_size as usize == size;
                } else {
                    conn.mtu_lost(&probe);
                }
            }

            if conn.mtu.is_done() {
                break;
            }
            assert!(round < 1999, "search did not terminate");
        }

        assert!(io.submitted.len() <= 8);
        assert!((1344..=PATH_MTU as u16).contains(&conn.mtu.confirmed()));
        assert!(ceiling_raised, "the datagram ceiling was raised at least once");
        assert_eq!(conn.ctp.max_udp_payload_size, conn.mtu.confirmed());
    }
}
