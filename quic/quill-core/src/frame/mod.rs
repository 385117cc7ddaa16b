// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The egress frame record and the wire encodings of every frame this
//! engine emits.
//!
//! Parsing the peer's frames is the ingress collaborator's job; a decoder
//! for the frames built here is available under `testing` for round-trip
//! assertions.

use crate::{time::Timestamp, varint, Level};
use bytes::Bytes;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub mod ty {
    pub const PADDING: u8 = 0x00;
    pub const PING: u8 = 0x01;
    pub const ACK: u8 = 0x02;
    pub const CRYPTO: u8 = 0x06;
    pub const NEW_TOKEN: u8 = 0x07;
    pub const STREAM: u8 = 0x08;
    pub const PATH_CHALLENGE: u8 = 0x1a;
    pub const PATH_RESPONSE: u8 = 0x1b;
    pub const CONNECTION_CLOSE: u8 = 0x1c;
    pub const CONNECTION_CLOSE_APP: u8 = 0x1d;
    pub const HANDSHAKE_DONE: u8 = 0x1e;

    /// STREAM type bits
    pub const STREAM_OFF: u8 = 0x04;
    pub const STREAM_LEN: u8 = 0x02;
    pub const STREAM_FIN: u8 = 0x01;
}

pub const PATH_DATA_LEN: usize = 8;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
//# Each ACK Range consists of alternating Gap and ACK Range Length values
//# in descending packet number order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AckRange {
    pub gap: u64,
    pub len: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ack {
    pub largest: u64,
    pub delay: u64,
    pub first_range: u64,
    pub ranges: Vec<AckRange>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Padding {
        len: usize,
    },
    Ping,
    Ack(Ack),
    Crypto {
        offset: u64,
        data: Bytes,
    },
    NewToken {
        token: Bytes,
    },
    Stream {
        id: u64,
        offset: u64,
        fin: bool,
        data: Bytes,
    },
    PathChallenge {
        data: [u8; PATH_DATA_LEN],
    },
    PathResponse {
        data: [u8; PATH_DATA_LEN],
    },
    ConnectionClose {
        app: bool,
        error_code: u64,
        frame_type: u64,
        reason: Bytes,
    },
    HandshakeDone,
}

impl Payload {
    //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2
    //# Packets containing PADDING, ACK, and CONNECTION_CLOSE frames are not
    //# considered ack-eliciting.
    #[inline]
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(
            self,
            Payload::Padding { .. } | Payload::Ack(_) | Payload::ConnectionClose { .. }
        )
    }

    /// Number of bytes the frame occupies on the wire
    pub fn encoding_size(&self) -> usize {
        match self {
            Payload::Padding { len } => *len,
            Payload::Ping | Payload::HandshakeDone => 1,
            Payload::Ack(ack) => {
                let mut size = 1
                    + varint::size_of(ack.largest)
                    + varint::size_of(ack.delay)
                    + varint::size_of(ack.ranges.len() as u64)
                    + varint::size_of(ack.first_range);
                for range in &ack.ranges {
                    size += varint::size_of(range.gap) + varint::size_of(range.len);
                }
                size
            }
            Payload::Crypto { offset, data } => {
                1 + varint::size_of(*offset) + varint::size_of(data.len() as u64) + data.len()
            }
            Payload::NewToken { token } => 1 + varint::size_of(token.len() as u64) + token.len(),
            Payload::Stream {
                id, offset, data, ..
            } => {
                1 + varint::size_of(*id)
                    + if *offset > 0 {
                        varint::size_of(*offset)
                    } else {
                        0
                    }
                    + varint::size_of(data.len() as u64)
                    + data.len()
            }
            Payload::PathChallenge { .. } | Payload::PathResponse { .. } => 1 + PATH_DATA_LEN,
            Payload::ConnectionClose {
                app,
                error_code,
                frame_type,
                reason,
            } => {
                1 + varint::size_of(*error_code)
                    + if *app { 0 } else { varint::size_of(*frame_type) }
                    + varint::size_of(reason.len() as u64)
                    + reason.len()
            }
        }
    }

    /// Appends the frame to `buf`
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Payload::Padding { len } => {
                buf.resize(buf.len() + len, ty::PADDING);
            }
            Payload::Ping => buf.push(ty::PING),
            Payload::HandshakeDone => buf.push(ty::HANDSHAKE_DONE),
            Payload::Ack(ack) => {
                buf.push(ty::ACK);
                varint::encode(ack.largest, buf);
                varint::encode(ack.delay, buf);
                varint::encode(ack.ranges.len() as u64, buf);
                varint::encode(ack.first_range, buf);
                for range in &ack.ranges {
                    varint::encode(range.gap, buf);
                    varint::encode(range.len, buf);
                }
            }
            Payload::Crypto { offset, data } => {
                buf.push(ty::CRYPTO);
                varint::encode(*offset, buf);
                varint::encode(data.len() as u64, buf);
                buf.extend_from_slice(data);
            }
            Payload::NewToken { token } => {
                buf.push(ty::NEW_TOKEN);
                varint::encode(token.len() as u64, buf);
                buf.extend_from_slice(token);
            }
            Payload::Stream {
                id,
                offset,
                fin,
                data,
            } => {
                let mut tag = ty::STREAM | ty::STREAM_LEN;
                if *offset > 0 {
                    tag |= ty::STREAM_OFF;
                }
                if *fin {
                    tag |= ty::STREAM_FIN;
                }
                buf.push(tag);
                varint::encode(*id, buf);
                if *offset > 0 {
                    varint::encode(*offset, buf);
                }
                varint::encode(data.len() as u64, buf);
                buf.extend_from_slice(data);
            }
            Payload::PathChallenge { data } => {
                buf.push(ty::PATH_CHALLENGE);
                buf.extend_from_slice(data);
            }
            Payload::PathResponse { data } => {
                buf.push(ty::PATH_RESPONSE);
                buf.extend_from_slice(data);
            }
            Payload::ConnectionClose {
                app,
                error_code,
                frame_type,
                reason,
            } => {
                buf.push(if *app {
                    ty::CONNECTION_CLOSE_APP
                } else {
                    ty::CONNECTION_CLOSE
                });
                varint::encode(*error_code, buf);
                if !*app {
                    varint::encode(*frame_type, buf);
                }
                varint::encode(reason.len() as u64, buf);
                buf.extend_from_slice(reason);
            }
        }
    }

    #[inline]
    pub fn is_path_probe(&self) -> bool {
        matches!(
            self,
            Payload::PathChallenge { .. } | Payload::PathResponse { .. }
        )
    }
}

/// One queued frame with its egress bookkeeping
#[derive(Clone, Debug)]
pub struct Frame {
    pub level: Level,
    pub payload: Payload,
    /// The peer must acknowledge a packet carrying this frame
    pub need_ack: bool,
    /// Stop filling the packet after this frame
    pub flush: bool,
    /// MTU probe; never counted toward congestion
    pub probe: bool,
    pub pnum: u64,
    pub first: Option<Timestamp>,
    pub last: Option<Timestamp>,
    /// Sealed datagram contribution of the whole packet; set only on the
    /// first frame of each packet
    pub plen: usize,
    /// Whether the packet this frame was sealed into was ack-eliciting
    pub pkt_need_ack: bool,
}

impl Frame {
    pub fn new(level: Level, payload: Payload) -> Self {
        let need_ack = payload.is_ack_eliciting();
        Self {
            level,
            payload,
            need_ack,
            flush: false,
            probe: false,
            pnum: 0,
            first: None,
            last: None,
            plen: 0,
            pkt_need_ack: false,
        }
    }

    #[inline]
    pub fn encoding_size(&self) -> usize {
        self.payload.encoding_size()
    }

    /// Shrinks the frame so it fits in `max` bytes and returns the
    /// remainder as a new frame to be queued right after this one
    ///
    /// Only CRYPTO and STREAM frames are divisible; everything else
    /// declines (`None`), as does a split that would leave either part
    /// empty.
    pub fn split_off(&mut self, max: usize) -> Option<Frame> {
        match &mut self.payload {
            Payload::Crypto { offset, data } => {
                let base = 1 + varint::size_of(*offset);
                let take = split_len(base, max, data.len())?;

                let rest = data.split_off(take);
                let remainder = Payload::Crypto {
                    offset: *offset + take as u64,
                    data: rest,
                };
                Some(self.split_remainder(remainder))
            }
            Payload::Stream {
                id,
                offset,
                fin,
                data,
            } => {
                let base = 1
                    + varint::size_of(*id)
                    + if *offset > 0 {
                        varint::size_of(*offset)
                    } else {
                        0
                    };
                let take = split_len(base, max, data.len())?;

                let rest = data.split_off(take);
                let remainder = Payload::Stream {
                    id: *id,
                    offset: *offset + take as u64,
                    fin: core::mem::take(fin),
                    data: rest,
                };
                Some(self.split_remainder(remainder))
            }
            _ => None,
        }
    }

    fn split_remainder(&mut self, payload: Payload) -> Frame {
        let mut remainder = Frame::new(self.level, payload);
        remainder.need_ack = self.need_ack;
        remainder.flush = core::mem::take(&mut self.flush);
        remainder
    }
}

/// Largest `take` such that a frame with `base` bytes of type+metadata, a
/// length varint, and `take` payload bytes fits in `max`; both parts must
/// stay non-empty
fn split_len(base: usize, max: usize, available: usize) -> Option<usize> {
    ensure!(available >= 2, None);

    let mut take = available - 1;
    loop {
        if base + varint::size_of(take as u64) + take <= max {
            return Some(take);
        }
        take = take.checked_sub(1)?;
        ensure!(take > 0, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads() -> Vec<Payload> {
        vec![
            Payload::Padding { len: 13 },
            Payload::Ping,
            Payload::HandshakeDone,
            Payload::Ack(Ack {
                largest: 100_000,
                delay: 81,
                first_range: 3,
                ranges: vec![AckRange { gap: 2, len: 70 }, AckRange { gap: 0, len: 1 }],
            }),
            Payload::Crypto {
                offset: 16384,
                data: Bytes::from_static(&[0x5a; 900]),
            },
            Payload::NewToken {
                token: Bytes::from_static(b"opaque token"),
            },
            Payload::Stream {
                id: 4,
                offset: 0,
                fin: false,
                data: Bytes::from_static(&[0x11; 77]),
            },
            Payload::Stream {
                id: 63,
                offset: 300,
                fin: true,
                data: Bytes::from_static(&[0x22; 64]),
            },
            Payload::PathChallenge { data: [9; 8] },
            Payload::PathResponse { data: [3; 8] },
            Payload::ConnectionClose {
                app: false,
                error_code: 0x0a,
                frame_type: 0x06,
                reason: Bytes::from_static(b"crypto buffer exceeded"),
            },
            Payload::ConnectionClose {
                app: true,
                error_code: 0x101,
                frame_type: 0,
                reason: Bytes::new(),
            },
        ]
    }

    #[test]
    fn encoding_size_matches_encode() {
        for payload in payloads() {
            let mut buf = vec![];
            payload.encode(&mut buf);
            assert_eq!(buf.len(), payload.encoding_size(), "{payload:?}");
        }
    }

    #[test]
    fn ack_eliciting_classification() {
        for payload in payloads() {
            let expected = !matches!(
                payload,
                Payload::Padding { .. } | Payload::Ack(_) | Payload::ConnectionClose { .. }
            );
            assert_eq!(payload.is_ack_eliciting(), expected);
        }
    }

    #[test]
    fn crypto_split() {
        let mut frame = Frame::new(
            Level::Initial,
            Payload::Crypto {
                offset: 0,
                data: Bytes::from_static(&[7; 1000]),
            },
        );
        frame.flush = true;

        let remainder = frame.split_off(500).unwrap();

        assert!(frame.encoding_size() <= 500);
        assert!(!frame.flush);
        assert!(remainder.flush);
        assert!(remainder.need_ack);

        let (Payload::Crypto { offset: o1, data: d1 }, Payload::Crypto { offset: o2, data: d2 }) =
            (&frame.payload, &remainder.payload)
        else {
            panic!("split changed the frame type");
        };
        assert_eq!(*o1, 0);
        assert_eq!(*o2, d1.len() as u64);
        assert_eq!(d1.len() + d2.len(), 1000);
    }

    #[test]
    fn stream_split_moves_fin() {
        let mut frame = Frame::new(
            Level::Application,
            Payload::Stream {
                id: 8,
                offset: 1200,
                fin: true,
                data: Bytes::from_static(&[1; 300]),
            },
        );

        let remainder = frame.split_off(100).unwrap();

        assert!(frame.encoding_size() <= 100);
        let Payload::Stream { fin: first_fin, .. } = frame.payload else {
            unreachable!()
        };
        let Payload::Stream {
            fin: rest_fin,
            offset,
            ..
        } = remainder.payload
        else {
            unreachable!()
        };
        assert!(!first_fin);
        assert!(rest_fin);
        assert!(offset > 1200);
    }

    #[test]
    fn indivisible_frames_decline() {
        for payload in [
            Payload::Ping,
            Payload::PathChallenge { data: [0; 8] },
            Payload::ConnectionClose {
                app: true,
                error_code: 1,
                frame_type: 0,
                reason: Bytes::new(),
            },
        ] {
            let mut frame = Frame::new(Level::Application, payload);
            assert!(frame.split_off(4).is_none());
        }
    }

    #[test]
    fn split_requires_room_for_both_parts() {
        let mut frame = Frame::new(
            Level::Application,
            Payload::Stream {
                id: 0,
                offset: 0,
                fin: false,
                data: Bytes::from_static(&[1; 2]),
            },
        );
        // room for the metadata alone declines rather than emitting an
        // empty first part
        assert!(frame.split_off(3).is_none());
    }

    #[test]
    fn round_trip() {
        for payload in payloads() {
            let mut buf = vec![];
            payload.encode(&mut buf);
            let (decoded, len) = testing::decode(&buf).unwrap();
            assert_eq!(len, buf.len(), "{payload:?}");
            assert_eq!(decoded, payload);
        }
    }
}
