//! Linux transports for DHCP traffic: a raw `AF_PACKET` link-layer socket
//! for talking to hosts that do not yet own an IP address, and a cooked
//! `AF_INET`/`SOCK_DGRAM` socket for everything else. Both are hidden
//! behind traits so the server/client logic can be exercised against an
//! in-memory double without root privileges (see [`testutil`]).

pub mod iface;
pub mod raw;
pub mod testutil;
pub mod udp;

use std::future::Future;
use std::net::SocketAddrV4;

/// The raw link-layer path: the caller hands over an already-built IP/UDP
/// frame (see `dhcp-raw`) and a destination hardware address.
pub trait LinkTransport {
    type Error: std::error::Error + Send + Sync + 'static;

    fn send_raw(
        &self,
        dst_mac: [u8; 6],
        frame: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>>;

    fn recv_raw(&self, buf: &mut [u8]) -> impl Future<Output = Result<usize, Self::Error>>;
}

/// The cooked path: a normal, kernel-routed UDP socket.
pub trait UdpTransport {
    type Error: std::error::Error + Send + Sync + 'static;

    fn send_to(
        &self,
        dst: SocketAddrV4,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>>;

    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(usize, SocketAddrV4), Self::Error>>;
}

pub use raw::LinkSocket;
pub use udp::UdpSocket;
