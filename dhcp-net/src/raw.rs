//! `AF_PACKET`/`SOCK_DGRAM` raw link-layer socket. `SOCK_DGRAM` at this
//! level means the kernel still frames and strips the Ethernet header for
//! us; what crosses the `send`/`recv` boundary is the IP packet built (or
//! to be parsed) by `dhcp-raw`.

use std::io;
use std::mem::{size_of, MaybeUninit};
use std::net::UdpSocket as StdUdpSocket;
use std::os::fd::FromRawFd;

use async_io::Async;
use log::trace;

use crate::LinkTransport;

const ETH_P_IP: u16 = 0x0800;

macro_rules! syscall {
    ($f:ident ( $($arg:expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$f($($arg),*) };
        if res == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

fn sockaddr_ll(ifindex: u32, mac: Option<[u8; 6]>) -> libc::sockaddr_ll {
    let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = (ETH_P_IP as u16).to_be();
    addr.sll_ifindex = ifindex as i32;

    if let Some(mac) = mac {
        addr.sll_halen = 6;
        addr.sll_addr[..6].copy_from_slice(&mac);
    }

    addr
}

/// A raw link-layer socket bound to one interface.
pub struct LinkSocket {
    io: Async<StdUdpSocket>,
    ifindex: u32,
}

impl LinkSocket {
    pub fn bind(ifindex: u32) -> io::Result<Self> {
        let fd = syscall!(socket(
            libc::AF_PACKET,
            libc::SOCK_DGRAM,
            (ETH_P_IP as u16).to_be() as i32
        ))?;

        let addr = sockaddr_ll(ifindex, None);
        let bind_res = syscall!(bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            size_of::<libc::sockaddr_ll>() as u32,
        ));

        if let Err(e) = bind_res {
            unsafe { libc::close(fd) };
            return Err(e);
        }

        let std_socket = unsafe { StdUdpSocket::from_raw_fd(fd) };
        std_socket.set_broadcast(true)?;
        std_socket.set_nonblocking(true)?;

        Ok(Self {
            io: Async::new(std_socket)?,
            ifindex,
        })
    }
}

#[derive(Debug)]
pub struct RawIoError(io::Error);

impl std::fmt::Display for RawIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RawIoError {}

impl From<io::Error> for RawIoError {
    fn from(value: io::Error) -> Self {
        Self(value)
    }
}

impl LinkTransport for LinkSocket {
    type Error = RawIoError;

    async fn send_raw(&self, dst_mac: [u8; 6], frame: &[u8]) -> Result<(), Self::Error> {
        let addr = sockaddr_ll(self.ifindex, Some(dst_mac));

        let sent = self
            .io
            .write_with(|io| {
                syscall!(sendto(
                    std::os::fd::AsRawFd::as_raw_fd(io),
                    frame.as_ptr() as *const libc::c_void,
                    frame.len(),
                    libc::MSG_NOSIGNAL,
                    &addr as *const _ as *const libc::sockaddr,
                    size_of::<libc::sockaddr_ll>() as u32,
                ))
                .map(|n| n as usize)
            })
            .await?;

        trace!("sent {sent} raw bytes to {dst_mac:02x?}");
        debug_assert_eq!(sent, frame.len());

        Ok(())
    }

    async fn recv_raw(&self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let len = self
            .io
            .read_with(|io| {
                let mut storage = MaybeUninit::<libc::sockaddr_storage>::zeroed();
                let mut addrlen = size_of::<libc::sockaddr_storage>() as u32;

                syscall!(recvfrom(
                    std::os::fd::AsRawFd::as_raw_fd(io),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                    storage.as_mut_ptr() as *mut libc::sockaddr,
                    &mut addrlen,
                ))
                .map(|n| n as usize)
            })
            .await?;

        Ok(len)
    }
}
