//! UDP header encode/decode (RFC 768) with the IPv4 pseudo-header checksum.

use std::net::{Ipv4Addr, SocketAddrV4};

use log::trace;

use crate::bytes::{Reader, Writer};
use crate::{checksum_accumulate, checksum_finish, Error};

pub fn decode(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    packet: &[u8],
    filter_src: Option<u16>,
    filter_dst: Option<u16>,
) -> Result<Option<(SocketAddrV4, SocketAddrV4, &[u8])>, Error> {
    let decoded = UdpHeader::decode_with_payload(packet, src, dst, filter_src, filter_dst)?;

    Ok(decoded.map(|(hdr, payload)| {
        (
            SocketAddrV4::new(src, hdr.src_port),
            SocketAddrV4::new(dst, hdr.dst_port),
            payload,
        )
    }))
}

pub fn encode<F>(
    buf: &mut [u8],
    src: SocketAddrV4,
    dst: SocketAddrV4,
    payload: F,
) -> Result<&[u8], Error>
where
    F: FnOnce(&mut [u8]) -> Result<usize, Error>,
{
    UdpHeader::new(src.port(), dst.port()).encode_with_payload(buf, *src.ip(), *dst.ip(), payload)
}

#[derive(Clone, Debug)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub len: u16,
    pub checksum: u16,
}

impl UdpHeader {
    pub const PROTO: u8 = 17;
    pub const SIZE: usize = 8;
    pub const CHECKSUM_WORD: usize = 3;

    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self {
            src_port,
            dst_port,
            len: 0,
            checksum: 0,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(data);

        Ok(Self {
            src_port: u16::from_be_bytes(r.array()?),
            dst_port: u16::from_be_bytes(r.array()?),
            len: u16::from_be_bytes(r.array()?),
            checksum: u16::from_be_bytes(r.array()?),
        })
    }

    pub fn encode<'o>(&self, buf: &'o mut [u8]) -> Result<&'o [u8], Error> {
        let mut w = Writer::new(buf);

        w.bytes(&self.src_port.to_be_bytes())?
            .bytes(&self.dst_port.to_be_bytes())?
            .bytes(&self.len.to_be_bytes())?
            .bytes(&self.checksum.to_be_bytes())?;

        let len = w.len();
        Ok(&buf[..len])
    }

    pub fn encode_with_payload<'o, F>(
        &mut self,
        buf: &'o mut [u8],
        src: Ipv4Addr,
        dst: Ipv4Addr,
        encoder: F,
    ) -> Result<&'o [u8], Error>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, Error>,
    {
        if buf.len() < Self::SIZE {
            return Err(Error::BufferOverflow);
        }

        let (hdr_buf, payload_buf) = buf.split_at_mut(Self::SIZE);
        let payload_len = encoder(payload_buf)?;

        let total = Self::SIZE + payload_len;
        self.len = total as u16;
        self.encode(hdr_buf)?;

        let packet = &mut buf[..total];
        let checksum = Self::checksum(packet, src, dst);
        self.checksum = checksum;
        Self::inject_checksum(packet, checksum);

        Ok(packet)
    }

    pub fn decode_with_payload(
        packet: &[u8],
        src: Ipv4Addr,
        dst: Ipv4Addr,
        filter_src: Option<u16>,
        filter_dst: Option<u16>,
    ) -> Result<Option<(Self, &[u8])>, Error> {
        let hdr = Self::decode(packet)?;

        if let Some(want) = filter_src {
            if want != hdr.src_port {
                return Ok(None);
            }
        }

        if let Some(want) = filter_dst {
            if want != hdr.dst_port {
                return Ok(None);
            }
        }

        let len = hdr.len as usize;
        if packet.len() < len {
            return Err(Error::DataUnderflow);
        }

        // A zero checksum means "not computed" (permitted by RFC 768 over IPv4).
        if hdr.checksum != 0 {
            let checksum = Self::checksum(&packet[..len], src, dst);
            trace!(
                "udp header: src_port={} dst_port={} len={} checksum={:#06x} computed={:#06x}",
                hdr.src_port,
                hdr.dst_port,
                hdr.len,
                hdr.checksum,
                checksum
            );

            if checksum != hdr.checksum {
                return Err(Error::InvalidChecksum);
            }
        }

        let packet = &packet[..len];
        Ok(Some((hdr, &packet[Self::SIZE..])))
    }

    pub fn inject_checksum(packet: &mut [u8], checksum: u16) {
        let bytes = checksum.to_be_bytes();
        let offset = Self::CHECKSUM_WORD * 2;
        packet[offset] = bytes[0];
        packet[offset + 1] = bytes[1];
    }

    /// UDP checksum over the pseudo IP header (src, dst, zero, proto, udp
    /// length) followed by the UDP header and payload.
    pub fn checksum(packet: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> u16 {
        let mut pseudo = [0u8; 12];
        Writer::new(&mut pseudo)
            .bytes(&u32::from(src).to_be_bytes())
            .unwrap()
            .bytes(&u32::from(dst).to_be_bytes())
            .unwrap()
            .byte(0)
            .unwrap()
            .byte(Self::PROTO)
            .unwrap()
            .bytes(&(packet.len() as u16).to_be_bytes())
            .unwrap();

        let sum = checksum_accumulate(&pseudo, usize::MAX)
            + checksum_accumulate(packet, Self::CHECKSUM_WORD);

        checksum_finish(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_checksum() {
        let src = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 68);
        let dst = SocketAddrV4::new(Ipv4Addr::new(255, 255, 255, 255), 67);

        let mut buf = [0u8; 64];
        let packet = encode(&mut buf, src, dst, |payload| {
            payload[..3].copy_from_slice(b"abc");
            Ok(3)
        })
        .unwrap();

        let (got_src, got_dst, payload) = decode(
            *src.ip(),
            *dst.ip(),
            packet,
            Some(src.port()),
            Some(dst.port()),
        )
        .unwrap()
        .unwrap();

        assert_eq!(got_src, src);
        assert_eq!(got_dst, dst);
        assert_eq!(payload, b"abc");
    }

    #[test]
    fn zero_checksum_is_accepted() {
        let src = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 68);
        let dst = SocketAddrV4::new(Ipv4Addr::new(255, 255, 255, 255), 67);

        let mut buf = [0u8; 64];
        let total = encode(&mut buf, src, dst, |payload| {
            payload[..3].copy_from_slice(b"abc");
            Ok(3)
        })
        .unwrap()
        .len();

        let zero_offset = UdpHeader::CHECKSUM_WORD * 2;
        buf[zero_offset] = 0;
        buf[zero_offset + 1] = 0;

        let decoded = decode(*src.ip(), *dst.ip(), &buf[..total], None, None).unwrap();
        assert!(decoded.is_some());
    }
}
