// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Single-datagram emitters and single-frame sends.
//!
//! Version Negotiation, Retry, Stateless Reset, and the early
//! CONNECTION_CLOSE all answer a packet for which no full connection
//! exists (or will survive); they bypass congestion control and are never
//! retransmitted. The frame-level helpers (`send_cc`, `send_new_token`,
//! `send_ack`) queue through the normal pipeline instead.

use crate::{
    conn::{Connection, CC_MIN_INTERVAL},
    Error,
};
use bytes::Bytes;
use quill_core::ensure;
use quill_core::{
    crypto::{self, Crypto, PacketKey as _},
    frame::{ty, Ack, Frame, Payload},
    io::DatagramWriter,
    packet::{
        header::{self, FIXED_BIT, FORM_LONG},
        number, PacketHeader, MAX_SR_PACKET, MIN_PKT_LEN, MIN_SR_PACKET, QUIC_VERSION,
        SERVER_CID_LEN,
    },
    time::Timestamp,
    token::{StatelessResetKey, TokenKey, NEW_TOKEN_LIFETIME, RETRY_TOKEN_LIFETIME, SR_TOKEN_LEN},
    Level,
};
use rand::{Rng, RngCore};
use std::net::SocketAddr;

/// The header fields of the inbound packet a single-shot emitter answers
#[derive(Debug)]
pub struct InboundPacket<'a> {
    pub version: u32,
    pub dcid: &'a [u8],
    pub scid: &'a [u8],
    /// Length of the triggering packet
    pub len: usize,
    pub remote: SocketAddr,
    pub local: Option<SocketAddr>,
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-6.1
//# If the version selected by the client is not acceptable to the server,
//# the server responds with a Version Negotiation packet (Section 17.2.1).

/// Sends a Version Negotiation packet; the caller stops processing the
/// offending datagram afterwards
pub fn negotiate_version<W: DatagramWriter>(io: &mut W, inpkt: &InboundPacket) {
    tracing::debug!(version = inpkt.version, "sending version negotiation packet");

    let mut buf = Vec::with_capacity(64);
    header::encode_version_negotiation(inpkt.scid, inpkt.dcid, &[QUIC_VERSION], &mut buf);

    // best effort; the offending datagram is dropped either way
    let _ = io.send(&buf, inpkt.remote, inpkt.local);
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-10.3.3
//# An endpoint MUST ensure that every Stateless Reset that it sends is
//# smaller than the packet that triggered it, unless it maintains state
//# sufficient to prevent looping.

/// Sends a Stateless Reset for a packet that matched no connection;
/// returns the emitted length, or `None` when the trigger is too small to
/// answer safely
pub fn send_stateless_reset<W: DatagramWriter>(
    io: &mut W,
    key: &StatelessResetKey,
    inpkt: &InboundPacket,
) -> Option<usize> {
    ensure!(inpkt.len > MIN_PKT_LEN, None);

    let len = if inpkt.len <= MIN_SR_PACKET {
        inpkt.len - 1
    } else {
        // long enough to pass for a real short-header packet, short
        // enough to rule out amplification
        let max = MAX_SR_PACKET.min(inpkt.len * 3);
        rand::thread_rng().gen_range(MIN_SR_PACKET..=max)
    };

    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf[..len - SR_TOKEN_LEN]);

    buf[0] = (buf[0] & !FORM_LONG) | FIXED_BIT;
    buf[len - SR_TOKEN_LEN..].copy_from_slice(&key.token(inpkt.dcid));

    tracing::debug!(len, "sending stateless reset");
    let _ = io.send(&buf, inpkt.remote, inpkt.local);

    Some(len)
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5.1
//# A server MUST NOT send more than one Retry packet in response to a
//# single UDP datagram.

/// Sends a Retry packet carrying an address-validation token bound to the
/// client address and its original DCID; the caller processes nothing
/// further from the triggering datagram
pub fn send_retry<C: Crypto, W: DatagramWriter>(
    io: &mut W,
    token_key: &TokenKey,
    inpkt: &InboundPacket,
    now_unix: u64,
) -> Result<(), Error> {
    let expires = now_unix + RETRY_TOKEN_LIFETIME;
    let token = token_key.new_token(&inpkt.remote, Some(inpkt.dcid), expires);

    let mut scid = [0u8; SERVER_CID_LEN];
    rand::thread_rng().fill_bytes(&mut scid);

    let mut buf = Vec::with_capacity(128);
    header::encode_retry::<C>(inpkt.version, inpkt.scid, &scid, inpkt.dcid, &token, &mut buf);

    io.send(&buf, inpkt.remote, inpkt.local)?;

    tracing::debug!(dcid = ?inpkt.scid, "retry packet sent");
    Ok(())
}

/// Closes a connection attempt before any connection state exists: one
/// Initial packet with a CONNECTION_CLOSE frame, protected with keys
/// derived from the client's DCID
pub fn send_early_cc<C: Crypto, W: DatagramWriter>(
    io: &mut W,
    inpkt: &InboundPacket,
    error_code: u64,
    reason: &str,
) -> Result<(), Error> {
    let payload = Payload::ConnectionClose {
        app: false,
        error_code,
        frame_type: 0,
        reason: Bytes::copy_from_slice(reason.as_bytes()),
    };

    let keys = C::new_initial(inpkt.dcid, inpkt.version);
    let tag_len = keys.packet.tag_len();

    let pn = number::truncate(0, 0);
    let header = PacketHeader {
        level: Level::Initial,
        version: inpkt.version,
        dcid: inpkt.scid,
        scid: inpkt.dcid,
        token: &[],
        key_phase: false,
        pn,
    };

    let mut packet = Vec::with_capacity(header.encoded_len() + payload.encoding_size() + tag_len);
    let header_len = header.encoded_len();

    let mut body = Vec::with_capacity(payload.encoding_size());
    payload.encode(&mut body);
    let min_payload = crypto::min_payload_for_sample(pn.len());
    if body.len() < min_payload {
        body.resize(min_payload, ty::PADDING);
    }

    let pn_offset = header.encode(body.len() + tag_len, &mut packet);
    packet.extend_from_slice(&body);

    crypto::seal_packet::<C>(&keys, 0, pn_offset, pn.len(), header_len, &mut packet)?;

    io.send(&packet, inpkt.remote, inpkt.local)?;
    Ok(())
}

impl<C: Crypto> Connection<C> {
    /// Queues a CONNECTION_CLOSE at the error level and flushes.
    ///
    /// While closing, retransmissions are limited to one per second;
    /// draining suppresses them entirely.
    pub fn send_cc<W: DatagramWriter>(&mut self, io: &mut W, now: Timestamp) -> Result<(), Error> {
        ensure!(!self.close.draining, Ok(()));

        if self.close.closing {
            if let Some(last) = self.close.last_cc {
                // do not send CC too often
                ensure!(now.saturating_duration_since(last) >= CC_MIN_INTERVAL, Ok(()));
            }
        }

        let reason = self
            .close
            .error_reason
            .as_deref()
            .map(|reason| Bytes::copy_from_slice(reason.as_bytes()))
            .unwrap_or_default();

        let frame = Frame::new(
            self.close.error_level,
            Payload::ConnectionClose {
                app: self.close.error_app,
                error_code: self.close.error,
                frame_type: self.close.error_ftype,
                reason,
            },
        );
        self.queue_frame(frame);
        self.close.last_cc = Some(now);

        self.output(io, now)
    }

    /// Queues a NEW_TOKEN frame carrying a token the peer can use to skip
    /// address validation on a future connection
    pub fn send_new_token(&mut self, now_unix: u64) {
        let key = self.config.token_key();
        let token = key.new_token(&self.path.remote, None, now_unix + NEW_TOKEN_LIFETIME);

        let frame = Frame::new(
            Level::Application,
            Payload::NewToken {
                token: token.into(),
            },
        );
        self.queue_frame(frame);
    }

    /// Queues an ACK built from the level's received ranges, at priority
    ///
    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
    //# ACK Delay:  A variable-length integer encoding the acknowledgment
    //# delay in microseconds; see Section 13.2.5.  It is decoded by
    //# multiplying the value in the field by 2 to the power of the
    //# ack_delay_exponent transport parameter sent by the sender of the
    //# ACK frame.
    pub fn send_ack(&mut self, level: Level, now: Timestamp) {
        let exponent = self.tp.ack_delay_exponent;
        let ctx = self.ctx(level);

        let delay = (now
            .saturating_duration_since(ctx.largest_received_at)
            .as_micros() as u64)
            >> exponent;

        let frame = Frame::new(
            level,
            Payload::Ack(Ack {
                largest: ctx.largest_range,
                delay,
                first_range: ctx.first_range,
                ranges: ctx.ranges.clone(),
            }),
        );
        self.queue_frame_priority(frame);
    }

    /// Queues an immediate single-range ACK
    pub fn send_ack_range(&mut self, level: Level, smallest: u64, largest: u64) {
        let frame = Frame::new(
            level,
            Payload::Ack(Ack {
                largest,
                delay: 0,
                first_range: largest - smallest,
                ranges: vec![],
            }),
        );
        self.queue_frame_priority(frame);
    }

    /// Seals `frame` as a single-frame Application packet of at least
    /// `min` datagram bytes and submits it outside the packer, consuming a
    /// packet number.
    ///
    /// Back-pressure is not reverted here: the frame is treated as sent
    /// and the loss detector recovers it. Used for path validation frames
    /// and MTU probes.
    pub fn frame_sendto<W: DatagramWriter>(
        &mut self,
        io: &mut W,
        mut frame: Frame,
        min: usize,
        now: Timestamp,
        dont_fragment: bool,
    ) -> Result<Frame, Error> {
        let Self {
            send_ctx,
            keys,
            scratch,
            dcid,
            scid,
            version,
            key_phase,
            path,
            ..
        } = self;
        let ctx = &mut send_ctx[Level::Application.index()];
        let Some(keys) = keys.get(Level::Application) else {
            return Err(crypto::Error::MISSING_KEYS.into());
        };

        let pn = number::truncate(ctx.pnum, ctx.largest_ack);
        let header = PacketHeader {
            level: Level::Application,
            version: *version,
            dcid,
            scid,
            token: &[],
            key_phase: *key_phase,
            pn,
        };
        let header_len = header.encoded_len();
        let tag_len = keys.packet.tag_len();

        let mut min_payload = min.saturating_sub(header_len + tag_len);
        min_payload = min_payload.max(crypto::min_payload_for_sample(pn.len()));

        let payload = &mut scratch.payload;
        payload.clear();
        frame.payload.encode(payload);
        if payload.len() < min_payload {
            payload.resize(min_payload, ty::PADDING);
        }

        let packet = &mut scratch.packet;
        packet.clear();
        let pn_offset = header.encode(payload.len() + tag_len, packet);
        packet.extend_from_slice(payload);

        let sealed_len =
            crypto::seal_packet::<C>(keys, ctx.pnum, pn_offset, pn.len(), header_len, packet)?;

        frame.plen = sealed_len;
        frame.pnum = ctx.pnum;
        frame.first.get_or_insert(now);
        frame.last = Some(now);
        ctx.pnum += 1;

        if dont_fragment {
            io.send_dont_fragment(packet, path.remote, path.local)?;
        } else {
            io.send(packet, path.remote, path.local)?;
        }

        Ok(frame)
    }
}
