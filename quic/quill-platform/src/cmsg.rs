// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Control-message encoding for `sendmsg`/`sendmmsg`.
//!
//! Messages are written back to back into an aligned buffer with
//! `CMSG_SPACE` strides, the way the kernel expects to walk them.

use core::{mem, ptr};
use std::net::SocketAddr;

/// Room for a UDP_SEGMENT header plus either pktinfo variant
pub(crate) const SPACE: usize = 128;

#[repr(align(8))]
pub(crate) struct Storage(pub [u8; SPACE]);

impl Storage {
    pub fn new() -> Self {
        Storage([0; SPACE])
    }
}

pub(crate) struct Writer<'a> {
    storage: &'a mut Storage,
    len: usize,
}

impl<'a> Writer<'a> {
    pub fn new(storage: &'a mut Storage) -> Self {
        Self { storage, len: 0 }
    }

    /// Bytes written so far; becomes `msg_controllen`
    pub fn len(&self) -> usize {
        self.len
    }

    /// Pointer to the start of the encoded messages, or null when none
    /// were written
    pub fn as_mut_ptr(&mut self) -> *mut libc::c_void {
        if self.len == 0 {
            return ptr::null_mut();
        }
        self.storage.0.as_mut_ptr().cast()
    }

    /// Appends one control message holding `value`
    pub fn push<T: Copy>(&mut self, level: libc::c_int, ty: libc::c_int, value: T) {
        let data_len = mem::size_of::<T>();

        unsafe {
            let space = libc::CMSG_SPACE(data_len as _) as usize;
            assert!(self.len + space <= SPACE, "cmsg storage exhausted");

            let header = self.storage.0.as_mut_ptr().add(self.len) as *mut libc::cmsghdr;
            (*header).cmsg_level = level;
            (*header).cmsg_type = ty;
            (*header).cmsg_len = libc::CMSG_LEN(data_len as _) as _;
            ptr::write_unaligned(libc::CMSG_DATA(header) as *mut T, value);

            self.len += space;
        }
    }

    /// Pins the source address replies leave from, for sockets bound to a
    /// wildcard address
    pub fn push_pktinfo(&mut self, local: SocketAddr) {
        match local {
            SocketAddr::V4(v4) => {
                let mut info: libc::in_pktinfo = unsafe { mem::zeroed() };
                info.ipi_spec_dst.s_addr = u32::from_ne_bytes(v4.ip().octets());
                self.push(libc::IPPROTO_IP, libc::IP_PKTINFO, info);
            }
            SocketAddr::V6(v6) => {
                let mut info: libc::in6_pktinfo = unsafe { mem::zeroed() };
                info.ipi6_addr.s6_addr = v6.ip().octets();
                self.push(libc::IPPROTO_IPV6, libc::IPV6_PKTINFO, info);
            }
        }
    }

    /// Asks the kernel to slice the buffer into datagrams of
    /// `segment_size` bytes
    #[cfg(target_os = "linux")]
    pub fn push_segment_size(&mut self, segment_size: u16) {
        self.push(libc::SOL_UDP, libc::UDP_SEGMENT, segment_size);
    }
}
