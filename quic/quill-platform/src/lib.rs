// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Kernel-facing half of the quill egress engine.
//!
//! Implements [`quill_core::io::DatagramWriter`] over a non-blocking UDP
//! socket: plain `sendmsg`, segmentation offload (`UDP_SEGMENT`), vectored
//! `sendmmsg`, source-address pinning for wildcard listeners, and the
//! don't-fragment bracketing used by path MTU probes.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod cmsg;
mod socket;

pub use socket::UdpIo;
