// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Decoder for the frames this crate encodes, for round-trip assertions.

use crate::{
    frame::{ty, Ack, AckRange, Payload, PATH_DATA_LEN},
    varint::VarInt,
};
use bytes::Bytes;

struct Cursor<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.at)?;
        self.at += 1;
        Some(byte)
    }

    fn varint(&mut self) -> Option<u64> {
        let (value, len) = VarInt::decode(&self.buf[self.at.min(self.buf.len())..])?;
        self.at += len;
        Some(value.as_u64())
    }

    fn bytes(&mut self, len: usize) -> Option<Bytes> {
        let end = self.at.checked_add(len)?;
        ensure!(end <= self.buf.len(), None);
        let data = Bytes::copy_from_slice(&self.buf[self.at..end]);
        self.at = end;
        Some(data)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let data = self.bytes(N)?;
        data.as_ref().try_into().ok()
    }
}

/// Decodes one frame from the start of `buf`, returning it with the number
/// of bytes consumed; consecutive PADDING bytes collapse into one frame
pub fn decode(buf: &[u8]) -> Option<(Payload, usize)> {
    let mut cursor = Cursor { buf, at: 0 };
    let tag = cursor.u8()?;

    let payload = match tag {
        ty::PADDING => {
            let len = 1 + buf[1..].iter().take_while(|&&b| b == ty::PADDING).count();
            cursor.at = len;
            Payload::Padding { len }
        }
        ty::PING => Payload::Ping,
        ty::HANDSHAKE_DONE => Payload::HandshakeDone,
        ty::ACK => {
            let largest = cursor.varint()?;
            let delay = cursor.varint()?;
            let range_count = cursor.varint()?;
            let first_range = cursor.varint()?;
            let mut ranges = Vec::with_capacity(range_count as usize);
            for _ in 0..range_count {
                let gap = cursor.varint()?;
                let len = cursor.varint()?;
                ranges.push(AckRange { gap, len });
            }
            Payload::Ack(Ack {
                largest,
                delay,
                first_range,
                ranges,
            })
        }
        ty::CRYPTO => {
            let offset = cursor.varint()?;
            let len = cursor.varint()?;
            let data = cursor.bytes(len as usize)?;
            Payload::Crypto { offset, data }
        }
        ty::NEW_TOKEN => {
            let len = cursor.varint()?;
            let token = cursor.bytes(len as usize)?;
            Payload::NewToken { token }
        }
        tag if tag & !0x07 == ty::STREAM => {
            let id = cursor.varint()?;
            let offset = if tag & ty::STREAM_OFF != 0 {
                cursor.varint()?
            } else {
                0
            };
            let len = if tag & ty::STREAM_LEN != 0 {
                cursor.varint()?
            } else {
                (cursor.buf.len() - cursor.at) as u64
            };
            let data = cursor.bytes(len as usize)?;
            Payload::Stream {
                id,
                offset,
                fin: tag & ty::STREAM_FIN != 0,
                data,
            }
        }
        ty::PATH_CHALLENGE => Payload::PathChallenge {
            data: cursor.array::<PATH_DATA_LEN>()?,
        },
        ty::PATH_RESPONSE => Payload::PathResponse {
            data: cursor.array::<PATH_DATA_LEN>()?,
        },
        ty::CONNECTION_CLOSE | ty::CONNECTION_CLOSE_APP => {
            let app = tag == ty::CONNECTION_CLOSE_APP;
            let error_code = cursor.varint()?;
            let frame_type = if app { 0 } else { cursor.varint()? };
            let len = cursor.varint()?;
            let reason = cursor.bytes(len as usize)?;
            Payload::ConnectionClose {
                app,
                error_code,
                frame_type,
                reason,
            }
        }
        _ => return None,
    };

    Some((payload, cursor.at))
}

/// Decodes a whole packet payload into frames
pub fn decode_all(mut buf: &[u8]) -> Option<Vec<Payload>> {
    let mut frames = vec![];
    while !buf.is_empty() {
        let (payload, len) = decode(buf)?;
        frames.push(payload);
        buf = &buf[len..];
    }
    Some(frames)
}
