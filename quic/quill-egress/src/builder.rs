// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Assembles one encrypted packet from a level's frame queue.

use crate::{conn::Connection, queue::Staged, Error};
use quill_core::ensure;
use quill_core::{
    crypto::{self, Crypto, PacketKey},
    frame::ty,
    packet::{number, PacketHeader, MAX_LONG_HEADER_PACKET, MIN_INITIAL_SIZE},
    time::Timestamp,
    Level,
};

impl<C: Crypto> Connection<C> {
    /// Writes one sealed packet from `level`'s queue into `out`,
    /// honoring `max` (upper bound on the packet's datagram contribution)
    /// and `min` (lower bound, met with PADDING).
    ///
    /// Returns the sealed length, or 0 when there is nothing to send,
    /// nothing fits, or the level has no keys.
    pub(crate) fn build_packet(
        &mut self,
        level: Level,
        out: &mut Vec<u8>,
        max: usize,
        min: usize,
        now: Timestamp,
    ) -> Result<usize, Error> {
        let Self {
            send_ctx,
            keys,
            scratch,
            dcid,
            scid,
            version,
            key_phase,
            config,
            ..
        } = self;
        let ctx = &mut send_ctx[level.index()];

        ensure!(!ctx.queue.is_empty(), Ok(0));
        let Some(keys) = keys.get(level) else {
            return Ok(0);
        };

        let pn = number::truncate(ctx.pnum, ctx.largest_ack);
        let header = PacketHeader {
            level,
            version: *version,
            dcid,
            scid,
            token: &[],
            key_phase: *key_phase,
            pn,
        };
        let header_len = header.encoded_len();
        let tag_len = keys.packet.tag_len();

        let mut max = max;
        if level.is_long() {
            // the Length field is encoded on two bytes
            max = max.min(header_len - pn.len() + MAX_LONG_HEADER_PACKET);
        }

        let mut min = min;
        let mut min_payload = min.saturating_sub(header_len + tag_len);
        let Some(max_payload) = max.checked_sub(header_len + tag_len) else {
            return Ok(0);
        };

        //= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
        //# An endpoint MUST NOT apply header protection if the sample would
        //# extend beyond the end of the packet.
        min_payload = min_payload.max(crypto::min_payload_for_sample(pn.len()));
        ensure!(min_payload <= max_payload, Ok(0));

        let payload = &mut scratch.payload;
        payload.clear();

        let mut nframes = 0usize;
        let mut pkt_need_ack = false;
        let mut expand = false;
        let first_staged = ctx.sending.len();

        loop {
            let Some(frame) = ctx.queue.peek() else {
                break;
            };
            let frame_size = frame.encoding_size();

            if frame.payload.is_path_probe() && !expand {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.1
                //# An endpoint MUST expand datagrams that contain a
                //# PATH_CHALLENGE frame to at least the smallest allowed
                //# maximum datagram size of 1200 bytes.
                if max < MIN_INITIAL_SIZE {
                    // the expanded packet will not fit; leave the frame queued
                    break;
                }
                if min < MIN_INITIAL_SIZE {
                    min = MIN_INITIAL_SIZE;
                    min_payload = min
                        .saturating_sub(header_len + tag_len)
                        .max(crypto::min_payload_for_sample(pn.len()));
                }
                expand = true;
            }

            if payload.len() >= max_payload {
                break;
            }

            if payload.len() + frame_size > max_payload
                && !ctx.queue.split_head(max_payload - payload.len())
            {
                // indivisible; self-heals on the next tick
                break;
            }

            let (mut frame, origin) = ctx.queue.pop_head(config.stream_shuffle).expect("peeked");

            pkt_need_ack |= frame.need_ack;

            tracing::trace!(?level, pnum = ctx.pnum, frame = ?frame.payload, "tx frame");

            frame.payload.encode(payload);
            frame.pnum = ctx.pnum;
            frame.first.get_or_insert(now);
            frame.last = Some(now);
            frame.plen = 0;

            let flush = frame.flush;
            ctx.sending.push(Staged { frame, origin });
            nframes += 1;

            if flush {
                break;
            }
        }

        ensure!(nframes > 0, Ok(0));

        if payload.len() < min_payload {
            payload.resize(min_payload, ty::PADDING);
        }

        let packet = &mut scratch.packet;
        packet.clear();
        let pn_offset = header.encode(payload.len() + tag_len, packet);
        packet.extend_from_slice(payload);

        let sealed_len =
            crypto::seal_packet::<C>(keys, ctx.pnum, pn_offset, pn.len(), header_len, packet)?;

        tracing::trace!(
            ?level,
            pnum = ctx.pnum,
            bytes = sealed_len,
            need_ack = pkt_need_ack,
            "tx packet"
        );

        ctx.pnum += 1;

        if pkt_need_ack {
            ctx.sending[first_staged].frame.plen = sealed_len;
        }
        for staged in &mut ctx.sending[first_staged..] {
            staged.frame.pkt_need_ack = pkt_need_ack;
        }

        out.extend_from_slice(packet);
        Ok(sealed_len)
    }
}

#[cfg(test)]
mod tests {
    use crate::{config::Config, conn::Connection};
    use bytes::Bytes;
    use quill_core::{
        crypto::testing::{self, NullCrypto, TAG_LEN},
        frame::{testing as frame_testing, Frame, Payload},
        packet::QUIC_VERSION,
        time::Timestamp,
        Level,
    };

    fn new_conn() -> Connection<NullCrypto> {
        let mut conn = Connection::new(
            QUIC_VERSION,
            vec![1; 8],
            vec![2; 20],
            "203.0.113.9:4433".parse().unwrap(),
            Config::default(),
        );
        conn.keys = testing::new_key_set();
        conn
    }

    fn now() -> Timestamp {
        Timestamp::from_millis(100)
    }

    /// Short header (1 + 8-byte dcid + 1-byte pn) for a fresh connection
    const SHORT_HEADER_LEN: usize = 10;

    #[test]
    fn empty_queue_builds_nothing() {
        let mut conn = new_conn();
        let mut out = vec![];

        let n = conn
            .build_packet(Level::Application, &mut out, 1200, 0, now())
            .unwrap();

        assert_eq!(n, 0);
        assert!(out.is_empty());
        assert_eq!(conn.ctx(Level::Application).pnum, 0);
    }

    #[test]
    fn payload_meets_the_sample_floor() {
        let mut conn = new_conn();
        conn.queue_frame(Frame::new(Level::Application, Payload::Ping));
        let mut out = vec![];

        let n = conn
            .build_packet(Level::Application, &mut out, 1200, 0, now())
            .unwrap();

        // a 1-byte PING is padded up to the 4 - pn_len sample minimum
        assert_eq!(n, SHORT_HEADER_LEN + 3 + TAG_LEN);
        assert_eq!(conn.ctx(Level::Application).pnum, 1);
    }

    #[test]
    fn exact_fit_leaves_no_padding() {
        let mut conn = new_conn();
        // 1 type + 1 id + 2 len + 496 data = 500 bytes
        conn.queue_stream_frame(
            4,
            Frame::new(
                Level::Application,
                Payload::Stream {
                    id: 4,
                    offset: 0,
                    fin: false,
                    data: Bytes::from(vec![7; 496]),
                },
            ),
        );
        let mut out = vec![];

        let max = SHORT_HEADER_LEN + 500 + TAG_LEN;
        let n = conn
            .build_packet(Level::Application, &mut out, max, 0, now())
            .unwrap();

        assert_eq!(n, max);
        let frames = frame_testing::decode_all(&out[SHORT_HEADER_LEN..n - TAG_LEN]).unwrap();
        assert_eq!(frames.len(), 1, "no padding appended");
    }

    #[test]
    fn initial_data_pads_to_the_datagram_floor() {
        let mut conn = new_conn();
        conn.queue_frame(Frame::new(
            Level::Initial,
            Payload::Crypto {
                offset: 0,
                data: Bytes::from(vec![3; 10]),
            },
        ));
        let mut out = vec![];

        let n = conn
            .build_packet(Level::Initial, &mut out, 1350, 1200, now())
            .unwrap();

        assert_eq!(n, 1200);

        // everything after the CRYPTO frame is PADDING
        let header_len = 1 + 4 + 1 + 8 + 1 + 20 + 1 + 2 + 1;
        let frames = frame_testing::decode_all(&out[header_len..n - TAG_LEN]).unwrap();
        assert!(matches!(frames[0], Payload::Crypto { .. }));
        assert!(matches!(frames[1], Payload::Padding { .. }));
    }

    #[test]
    fn path_challenge_defers_when_the_floor_does_not_fit() {
        let mut conn = new_conn();
        conn.queue_frame(Frame::new(
            Level::Application,
            Payload::PathChallenge { data: [5; 8] },
        ));
        let mut out = vec![];

        let n = conn
            .build_packet(Level::Application, &mut out, 1100, 0, now())
            .unwrap();

        assert_eq!(n, 0);
        assert!(out.is_empty());
        assert_eq!(conn.ctx(Level::Application).pnum, 0);
        assert!(
            conn.ctx(Level::Application).queue.peek().is_some(),
            "the frame stays queued for a bigger budget"
        );
    }

    #[test]
    fn path_challenge_expands_the_datagram() {
        let mut conn = new_conn();
        conn.queue_frame(Frame::new(
            Level::Application,
            Payload::PathChallenge { data: [5; 8] },
        ));
        let mut out = vec![];

        let n = conn
            .build_packet(Level::Application, &mut out, 1252, 0, now())
            .unwrap();

        assert_eq!(n, 1200);
    }

    #[test]
    fn oversize_frame_splits_and_the_rest_stays() {
        let mut conn = new_conn();
        conn.queue_frame(Frame::new(
            Level::Application,
            Payload::Crypto {
                offset: 0,
                data: Bytes::from(vec![9; 2000]),
            },
        ));
        let mut out = vec![];

        let n = conn
            .build_packet(Level::Application, &mut out, 1200, 0, now())
            .unwrap();

        assert_eq!(n, 1200);
        let remainder = conn.ctx(Level::Application).queue.peek().unwrap();
        let Payload::Crypto { offset, .. } = &remainder.payload else {
            panic!("remainder changed type");
        };
        assert!(*offset > 0);
    }

    #[test]
    fn flush_stops_the_packet() {
        let mut conn = new_conn();
        let mut first = Frame::new(Level::Application, Payload::Ping);
        first.flush = true;
        conn.queue_frame(first);
        conn.queue_frame(Frame::new(Level::Application, Payload::Ping));
        let mut out = vec![];

        conn.build_packet(Level::Application, &mut out, 1200, 0, now())
            .unwrap();

        assert_eq!(conn.ctx(Level::Application).staged_len(), 1);
        assert!(conn.ctx(Level::Application).queue.peek().is_some());
    }

    #[test]
    fn ack_eliciting_packets_stamp_plen_on_the_first_frame() {
        let mut conn = new_conn();
        conn.queue_frame(Frame::new(
            Level::Application,
            Payload::Ack(quill_core::frame::Ack {
                largest: 3,
                delay: 0,
                first_range: 3,
                ranges: vec![],
            }),
        ));
        conn.queue_frame(Frame::new(Level::Application, Payload::Ping));
        let mut out = vec![];

        let n = conn
            .build_packet(Level::Application, &mut out, 1200, 0, now())
            .unwrap();

        let ctx = conn.ctx(Level::Application);
        assert_eq!(ctx.sending[0].frame.plen, n, "first frame carries plen");
        assert_eq!(ctx.sending[1].frame.plen, 0);
        assert!(ctx.sending.iter().all(|staged| staged.frame.pkt_need_ack));
    }

    #[test]
    fn missing_keys_skip_the_level() {
        let mut conn = new_conn();
        conn.keys.discard(Level::Initial);
        conn.queue_frame(Frame::new(
            Level::Initial,
            Payload::Crypto {
                offset: 0,
                data: Bytes::from(vec![1; 16]),
            },
        ));
        let mut out = vec![];

        let n = conn
            .build_packet(Level::Initial, &mut out, 1200, 0, now())
            .unwrap();

        assert_eq!(n, 0);
    }

    #[test]
    fn sealed_packet_round_trips() {
        let mut conn = new_conn();
        let sent = vec![
            Payload::Ping,
            Payload::Stream {
                id: 8,
                offset: 64,
                fin: true,
                data: Bytes::from(vec![0xab; 200]),
            },
        ];
        for payload in &sent {
            conn.queue_frame(Frame::new(Level::Application, payload.clone()));
        }
        let mut out = vec![];

        let n = conn
            .build_packet(Level::Application, &mut out, 1200, 0, now())
            .unwrap();

        // null crypto: ciphertext is the plaintext, mask is zero
        let frames = frame_testing::decode_all(&out[SHORT_HEADER_LEN..n - TAG_LEN]).unwrap();
        let frames: Vec<_> = frames
            .into_iter()
            .filter(|frame| !matches!(frame, Payload::Padding { .. }))
            .collect();
        assert_eq!(frames, sent);
    }
}
