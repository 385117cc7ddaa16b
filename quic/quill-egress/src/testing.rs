// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A scriptable in-memory [`DatagramWriter`] for packer and emitter tests.

use quill_core::io::{Capabilities, DatagramWriter, SendResult};
use std::{collections::VecDeque, io, net::SocketAddr};

/// What the stub should answer on the next submission
#[derive(Copy, Clone, Debug)]
pub(crate) enum Response {
    Ok,
    Again,
    /// `sendmmsg` accepted only the first `n` messages
    Partial(usize),
    Err,
}

/// A successful submission, as the kernel would have seen it
#[derive(Clone, Debug)]
pub(crate) enum Submitted {
    Datagram(Vec<u8>),
    Segments { buf: Vec<u8>, segment_size: usize },
    Many(Vec<Vec<u8>>),
    DontFragment(Vec<u8>),
}

#[derive(Debug, Default)]
pub(crate) struct StubIo {
    pub caps: Capabilities,
    /// Scripted responses, consumed per call; exhausted means `Ok`
    pub responses: VecDeque<Response>,
    pub submitted: Vec<Submitted>,
}

impl StubIo {
    pub fn new() -> Self {
        Self {
            caps: Capabilities {
                gso: true,
                sendmmsg: true,
                mtu_discovery: true,
            },
            ..Self::default()
        }
    }

    pub fn respond(mut self, responses: impl IntoIterator<Item = Response>) -> Self {
        self.responses = responses.into_iter().collect();
        self
    }

    fn next_response(&mut self) -> Response {
        self.responses.pop_front().unwrap_or(Response::Ok)
    }

    /// Datagrams that went out, flattening GSO trains and mmsg batches
    pub fn datagrams(&self) -> Vec<Vec<u8>> {
        let mut out = vec![];
        for submitted in &self.submitted {
            match submitted {
                Submitted::Datagram(buf) | Submitted::DontFragment(buf) => out.push(buf.clone()),
                Submitted::Segments { buf, segment_size } => {
                    out.extend(buf.chunks(*segment_size).map(<[u8]>::to_vec));
                }
                Submitted::Many(bufs) => out.extend(bufs.iter().cloned()),
            }
        }
        out
    }
}

fn would_block() -> io::Result<SendResult> {
    Ok(SendResult::Again)
}

fn broken() -> io::Result<SendResult> {
    Err(io::Error::other("stub failure"))
}

impl DatagramWriter for StubIo {
    fn send(
        &mut self,
        buf: &[u8],
        _remote: SocketAddr,
        _local: Option<SocketAddr>,
    ) -> io::Result<SendResult> {
        match self.next_response() {
            Response::Ok | Response::Partial(_) => {
                self.submitted.push(Submitted::Datagram(buf.to_vec()));
                Ok(SendResult::Sent(buf.len()))
            }
            Response::Again => would_block(),
            Response::Err => broken(),
        }
    }

    fn send_segments(
        &mut self,
        buf: &[u8],
        segment_size: usize,
        _remote: SocketAddr,
        _local: Option<SocketAddr>,
    ) -> io::Result<SendResult> {
        match self.next_response() {
            Response::Ok | Response::Partial(_) => {
                self.submitted.push(Submitted::Segments {
                    buf: buf.to_vec(),
                    segment_size,
                });
                Ok(SendResult::Sent(buf.len()))
            }
            Response::Again => would_block(),
            Response::Err => broken(),
        }
    }

    fn send_many(
        &mut self,
        bufs: &[&[u8]],
        _remote: SocketAddr,
        _local: Option<SocketAddr>,
    ) -> io::Result<SendResult> {
        match self.next_response() {
            Response::Ok => {
                self.submitted
                    .push(Submitted::Many(bufs.iter().map(|b| b.to_vec()).collect()));
                Ok(SendResult::Sent(bufs.len()))
            }
            Response::Partial(n) => {
                let n = n.min(bufs.len());
                self.submitted
                    .push(Submitted::Many(bufs[..n].iter().map(|b| b.to_vec()).collect()));
                Ok(SendResult::Sent(n))
            }
            Response::Again => would_block(),
            Response::Err => broken(),
        }
    }

    fn send_dont_fragment(
        &mut self,
        buf: &[u8],
        _remote: SocketAddr,
        _local: Option<SocketAddr>,
    ) -> io::Result<SendResult> {
        match self.next_response() {
            Response::Ok | Response::Partial(_) => {
                self.submitted.push(Submitted::DontFragment(buf.to_vec()));
                Ok(SendResult::Sent(buf.len()))
            }
            Response::Again => would_block(),
            Response::Err => broken(),
        }
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }
}
