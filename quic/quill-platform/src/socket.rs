// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A non-blocking UDP socket implementing the egress writer contract.

use quill_core::io::{Capabilities, DatagramWriter, SendResult};
use std::{
    io,
    net::{SocketAddr, UdpSocket},
};

#[cfg(unix)]
use core::mem;
#[cfg(unix)]
use std::os::fd::AsRawFd;

#[cfg(any(target_os = "linux", target_os = "android"))]
use crate::cmsg;

/// UDP socket wrapper submitting datagrams with the most efficient
/// syscall the platform offers
pub struct UdpIo {
    socket: UdpSocket,
    caps: Capabilities,
}

impl UdpIo {
    /// Wraps an existing socket, switching it to non-blocking mode
    pub fn new(socket: UdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            caps: detect(),
        })
    }

    /// Creates and binds a non-blocking socket on `addr`
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        use socket2::{Domain, Protocol, Socket, Type};

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        Self::new(socket.into())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    #[cfg(unix)]
    fn sendmsg(
        &self,
        buf: &[u8],
        remote: SocketAddr,
        local: Option<SocketAddr>,
        segment_size: Option<u16>,
    ) -> io::Result<SendResult> {
        let addr = socket2::SockAddr::from(remote);

        let mut iov = libc::iovec {
            iov_base: buf.as_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = addr.as_ptr() as *mut libc::c_void;
        msg.msg_namelen = addr.len();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        let mut storage = cmsg::Storage::new();
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            let mut writer = cmsg::Writer::new(&mut storage);

            #[cfg(target_os = "linux")]
            if let Some(segment_size) = segment_size {
                writer.push_segment_size(segment_size);
            }
            if let Some(local) = local {
                writer.push_pktinfo(local);
            }

            if writer.len() > 0 {
                msg.msg_control = writer.as_mut_ptr();
                msg.msg_controllen = writer.len() as _;
            }
        }

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let _ = (local, segment_size);

        loop {
            let n = unsafe { libc::sendmsg(self.socket.as_raw_fd(), &msg, 0) };
            if n >= 0 {
                tracing::trace!(bytes = n, segmented = segment_size.is_some(), "sendmsg");
                return Ok(SendResult::Sent(n as usize));
            }

            let error = io::Error::last_os_error();
            match error.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(SendResult::Again),
                _ => return Err(error),
            }
        }
    }
}

impl DatagramWriter for UdpIo {
    fn send(
        &mut self,
        buf: &[u8],
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> io::Result<SendResult> {
        #[cfg(unix)]
        return self.sendmsg(buf, remote, local, None);

        #[cfg(not(unix))]
        {
            let _ = local;
            match self.socket.send_to(buf, remote) {
                Ok(n) => Ok(SendResult::Sent(n)),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(SendResult::Again),
                Err(error) => Err(error),
            }
        }
    }

    fn send_segments(
        &mut self,
        buf: &[u8],
        segment_size: usize,
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> io::Result<SendResult> {
        #[cfg(target_os = "linux")]
        {
            debug_assert!(segment_size <= quill_core::packet::MAX_UDP_SEGMENT_BUF);
            debug_assert!(buf.len() <= segment_size * quill_core::packet::MAX_SEGMENTS);
            return self.sendmsg(buf, remote, local, Some(segment_size as u16));
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (buf, segment_size, remote, local);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "UDP segmentation offload is unavailable on this platform",
            ))
        }
    }

    fn send_many(
        &mut self,
        bufs: &[&[u8]],
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> io::Result<SendResult> {
        #[cfg(target_os = "linux")]
        {
            const MAX: usize = quill_core::packet::MAX_SENDMMSG;

            let count = bufs.len().min(MAX);
            let addr = socket2::SockAddr::from(remote);

            let mut iovs: [libc::iovec; MAX] = unsafe { mem::zeroed() };
            let mut msgs: [libc::mmsghdr; MAX] = unsafe { mem::zeroed() };
            let mut storages: Vec<cmsg::Storage> = Vec::new();
            if local.is_some() {
                storages.resize_with(count, cmsg::Storage::new);
            }

            for i in 0..count {
                iovs[i] = libc::iovec {
                    iov_base: bufs[i].as_ptr() as *mut libc::c_void,
                    iov_len: bufs[i].len(),
                };

                let hdr = &mut msgs[i].msg_hdr;
                hdr.msg_name = addr.as_ptr() as *mut libc::c_void;
                hdr.msg_namelen = addr.len();
                hdr.msg_iov = &mut iovs[i];
                hdr.msg_iovlen = 1;

                if let Some(local) = local {
                    let mut writer = cmsg::Writer::new(&mut storages[i]);
                    writer.push_pktinfo(local);
                    hdr.msg_control = writer.as_mut_ptr();
                    hdr.msg_controllen = writer.len() as _;
                }
            }

            loop {
                let n = unsafe {
                    libc::sendmmsg(self.socket.as_raw_fd(), msgs.as_mut_ptr(), count as _, 0)
                };
                if n >= 0 {
                    tracing::trace!(messages = n, submitted = count, "sendmmsg");
                    return Ok(SendResult::Sent(n as usize));
                }

                let error = io::Error::last_os_error();
                match error.kind() {
                    io::ErrorKind::Interrupted => continue,
                    io::ErrorKind::WouldBlock => return Ok(SendResult::Again),
                    _ => return Err(error),
                }
            }
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (bufs, remote, local);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "sendmmsg is unavailable on this platform",
            ))
        }
    }

    /// Brackets one send with IP(V6)_MTU_DISCOVER = DO so the probe
    /// leaves with don't-fragment set, then restores DONT.
    ///
    /// Dual-stack sockets set the IPv4 option as well, since their
    /// traffic may leave over either family.
    fn send_dont_fragment(
        &mut self,
        buf: &[u8],
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> io::Result<SendResult> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            let fd = self.socket.as_raw_fd();
            let is_v6 = self.socket.local_addr()?.is_ipv6();
            let mut v6_only = false;

            if is_v6 {
                setsockopt(fd, libc::IPPROTO_IPV6, libc::IPV6_MTU_DISCOVER, libc::IP_PMTUDISC_DO)?;
                v6_only = getsockopt(fd, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY)? != 0;
            }

            if !v6_only {
                setsockopt(fd, libc::IPPROTO_IP, libc::IP_MTU_DISCOVER, libc::IP_PMTUDISC_DO)?;
            }

            let result = self.sendmsg(buf, remote, local, None);

            if !v6_only {
                let _ = setsockopt(fd, libc::IPPROTO_IP, libc::IP_MTU_DISCOVER, libc::IP_PMTUDISC_DONT);
            }
            if is_v6 {
                let _ = setsockopt(
                    fd,
                    libc::IPPROTO_IPV6,
                    libc::IPV6_MTU_DISCOVER,
                    libc::IP_PMTUDISC_DONT,
                );
            }

            result
        }

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            let _ = (buf, remote, local);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "IP_MTU_DISCOVER is unavailable on this platform",
            ))
        }
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }
}

fn detect() -> Capabilities {
    Capabilities {
        gso: cfg!(target_os = "linux"),
        sendmmsg: cfg!(target_os = "linux"),
        mtu_discovery: cfg!(any(target_os = "linux", target_os = "android")),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn setsockopt(
    fd: libc::c_int,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn getsockopt(fd: libc::c_int, level: libc::c_int, name: libc::c_int) -> io::Result<libc::c_int> {
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            level,
            name,
            &mut value as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if rc == 0 {
        Ok(value)
    } else {
        Err(io::Error::last_os_error())
    }
}
