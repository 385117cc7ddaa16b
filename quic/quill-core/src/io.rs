// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The seam between the egress engine and the kernel.
//!
//! The packer builds datagrams and hands them to a [`DatagramWriter`];
//! `quill-platform` implements the trait over `sendmsg`, GSO, and
//! `sendmmsg`. Transient back-pressure is a value, not an error: the
//! packer reverts its build and retries on a timer.

use std::{io, net::SocketAddr};

/// Outcome of a successful syscall submission
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SendResult {
    /// Bytes written (`send`, `send_segments`) or messages accepted
    /// (`send_many`; may be fewer than submitted)
    Sent(usize),
    /// The socket would block; retry after a short delay
    Again,
}

/// Submits finished datagrams with the most efficient available syscall
///
/// `local` pins the source address on wildcard listeners so replies leave
/// from the address the peer talked to.
pub trait DatagramWriter {
    /// One datagram via one `sendmsg`
    fn send(
        &mut self,
        buf: &[u8],
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> io::Result<SendResult>;

    /// Up to 64 back-to-back datagrams of `segment_size` bytes each (the
    /// final one may be shorter), segmented by the kernel
    fn send_segments(
        &mut self,
        buf: &[u8],
        segment_size: usize,
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> io::Result<SendResult>;

    /// Up to 64 independent datagrams in one `sendmmsg`
    fn send_many(
        &mut self,
        bufs: &[&[u8]],
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> io::Result<SendResult>;

    /// One datagram with the IP don't-fragment flag set for the duration
    /// of the call; used by path MTU probes
    fn send_dont_fragment(
        &mut self,
        buf: &[u8],
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> io::Result<SendResult>;

    /// Fast paths the implementation can actually reach on this host
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

/// Which kernel fast paths are available
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub gso: bool,
    pub sendmmsg: bool,
    pub mtu_discovery: bool,
}
