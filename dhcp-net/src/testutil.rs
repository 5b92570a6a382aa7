//! In-memory doubles for [`LinkTransport`]/[`UdpTransport`] so the server
//! and client logic can be driven end-to-end in tests without `CAP_NET_RAW`
//! or a live interface.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddrV4;
use std::sync::Mutex;

use crate::{LinkTransport, UdpTransport};

#[derive(Default)]
pub struct LoopbackLink {
    inbox: Mutex<VecDeque<Vec<u8>>>,
    sent: Mutex<Vec<([u8; 6], Vec<u8>)>>,
}

impl LoopbackLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a frame as if it had just arrived on the wire.
    pub fn push_incoming(&self, frame: &[u8]) {
        self.inbox.lock().unwrap().push_back(frame.to_vec());
    }

    /// Drains everything sent so far, in send order.
    pub fn take_sent(&self) -> Vec<([u8; 6], Vec<u8>)> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }
}

impl LinkTransport for LoopbackLink {
    type Error = Infallible;

    async fn send_raw(&self, dst_mac: [u8; 6], frame: &[u8]) -> Result<(), Self::Error> {
        self.sent.lock().unwrap().push((dst_mac, frame.to_vec()));
        Ok(())
    }

    async fn recv_raw(&self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        loop {
            if let Some(frame) = self.inbox.lock().unwrap().pop_front() {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                return Ok(len);
            }

            // A real socket would block; the test double yields instead so a
            // caller racing this against a timeout future still makes progress.
            futures_lite::future::yield_now().await;
        }
    }
}

#[derive(Default)]
pub struct LoopbackUdp {
    inbox: Mutex<VecDeque<(Vec<u8>, SocketAddrV4)>>,
    sent: Mutex<Vec<(SocketAddrV4, Vec<u8>)>>,
}

impl LoopbackUdp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_incoming(&self, from: SocketAddrV4, data: &[u8]) {
        self.inbox.lock().unwrap().push_back((data.to_vec(), from));
    }

    pub fn take_sent(&self) -> Vec<(SocketAddrV4, Vec<u8>)> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }
}

impl UdpTransport for LoopbackUdp {
    type Error = Infallible;

    async fn send_to(&self, dst: SocketAddrV4, data: &[u8]) -> Result<(), Self::Error> {
        self.sent.lock().unwrap().push((dst, data.to_vec()));
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddrV4), Self::Error> {
        loop {
            if let Some((data, from)) = self.inbox.lock().unwrap().pop_front() {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                return Ok((len, from));
            }

            futures_lite::future::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_loopback_round_trips() {
        let link = LoopbackLink::new();
        link.push_incoming(b"hello");

        futures_lite::future::block_on(async {
            let mut buf = [0u8; 16];
            let len = link.recv_raw(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], b"hello");

            link.send_raw([1, 2, 3, 4, 5, 6], b"world").await.unwrap();
        });

        let sent = link.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, b"world");
    }
}
