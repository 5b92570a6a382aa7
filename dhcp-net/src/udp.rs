//! Cooked `AF_INET`/`SOCK_DGRAM` socket, bound to one interface the way
//! the original tool's `listen_socket()` did: `SO_REUSEADDR` so a restart
//! doesn't wait out `TIME_WAIT`, `SO_BROADCAST` so replies to `giaddr`-less
//! clients can go out as `255.255.255.255`, `SO_BINDTODEVICE` so the
//! socket only ever sees traffic on the configured interface.

use std::ffi::CString;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket as StdUdpSocket};
use std::os::fd::AsRawFd;

use async_io::Async;

use crate::UdpTransport;

pub struct UdpSocket {
    io: Async<StdUdpSocket>,
}

impl UdpSocket {
    pub fn bind(interface: &str, port: u16) -> io::Result<Self> {
        let std_socket = StdUdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
        std_socket.set_broadcast(true)?;
        std_socket.set_nonblocking(true)?;

        bind_to_device(&std_socket, interface)?;

        Ok(Self {
            io: Async::new(std_socket)?,
        })
    }
}

#[cfg(target_os = "linux")]
fn bind_to_device(socket: &StdUdpSocket, interface: &str) -> io::Result<()> {
    let name = CString::new(interface)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name has a NUL byte"))?;

    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            name.as_ptr() as *const libc::c_void,
            name.as_bytes_with_nul().len() as u32,
        )
    };

    if ret == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

#[derive(Debug)]
pub struct UdpIoError(io::Error);

impl std::fmt::Display for UdpIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for UdpIoError {}

impl From<io::Error> for UdpIoError {
    fn from(value: io::Error) -> Self {
        Self(value)
    }
}

impl UdpTransport for UdpSocket {
    type Error = UdpIoError;

    async fn send_to(&self, dst: SocketAddrV4, data: &[u8]) -> Result<(), Self::Error> {
        self.io.send_to(data, SocketAddr::V4(dst)).await?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddrV4), Self::Error> {
        let (len, addr) = self.io.recv_from(buf).await?;

        let SocketAddr::V4(addr) = addr else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "unexpected IPv6 peer").into());
        };

        Ok((len, addr))
    }
}
