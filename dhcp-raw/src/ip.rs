//! IPv4 header encode/decode (RFC 791), header checksum only — no fragment
//! reassembly or option parsing, since DHCP never needs either.

use std::net::Ipv4Addr;

use log::trace;

use crate::bytes::{Reader, Writer};
use crate::{checksum_accumulate, checksum_finish, Error};

pub fn decode(
    packet: &[u8],
    filter_src: Ipv4Addr,
    filter_dst: Ipv4Addr,
    filter_proto: Option<u8>,
) -> Result<Option<(Ipv4Addr, Ipv4Addr, u8, &[u8])>, Error> {
    let decoded = Ipv4Header::decode_with_payload(packet, filter_src, filter_dst, filter_proto)?;

    Ok(decoded.map(|(hdr, payload)| (hdr.src, hdr.dst, hdr.proto, payload)))
}

pub fn encode<F>(
    buf: &mut [u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: u8,
    encoder: F,
) -> Result<&[u8], Error>
where
    F: FnOnce(&mut [u8]) -> Result<usize, Error>,
{
    Ipv4Header::new(src, dst, proto).encode_with_payload(buf, encoder)
}

#[derive(Clone, Debug)]
pub struct Ipv4Header {
    pub ihl_words: u8,
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    pub frag_off: u16,
    pub ttl: u8,
    pub proto: u8,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    pub const MIN_SIZE: usize = 20;
    pub const CHECKSUM_WORD: usize = 5;
    /// DHCP broadcasts travel at most one hop, but the original tool gives
    /// them a generous TTL so a relay agent further away still sees them.
    pub const DEFAULT_TTL: u8 = 16;

    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, proto: u8) -> Self {
        Self {
            ihl_words: (Self::MIN_SIZE / 4) as u8,
            tos: 0,
            total_len: Self::MIN_SIZE as u16,
            id: 0,
            frag_off: 0,
            ttl: Self::DEFAULT_TTL,
            proto,
            checksum: 0,
            src,
            dst,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(data);

        let vihl = r.byte()?;
        if vihl >> 4 != 4 {
            return Err(Error::InvalidFormat);
        }

        Ok(Self {
            ihl_words: vihl & 0x0f,
            tos: r.byte()?,
            total_len: u16::from_be_bytes(r.array()?),
            id: u16::from_be_bytes(r.array()?),
            frag_off: u16::from_be_bytes(r.array()?),
            ttl: r.byte()?,
            proto: r.byte()?,
            checksum: u16::from_be_bytes(r.array()?),
            src: u32::from_be_bytes(r.array()?).into(),
            dst: u32::from_be_bytes(r.array()?).into(),
        })
    }

    pub fn encode<'o>(&self, buf: &'o mut [u8]) -> Result<&'o [u8], Error> {
        let mut w = Writer::new(buf);

        w.byte((4 << 4) | self.ihl_words)?
            .byte(self.tos)?
            .bytes(&self.total_len.to_be_bytes())?
            .bytes(&self.id.to_be_bytes())?
            .bytes(&self.frag_off.to_be_bytes())?
            .byte(self.ttl)?
            .byte(self.proto)?
            .bytes(&self.checksum.to_be_bytes())?
            .bytes(&u32::from(self.src).to_be_bytes())?
            .bytes(&u32::from(self.dst).to_be_bytes())?;

        let len = w.len();
        Ok(&buf[..len])
    }

    pub fn encode_with_payload<'o, F>(
        &mut self,
        buf: &'o mut [u8],
        encoder: F,
    ) -> Result<&'o [u8], Error>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, Error>,
    {
        let hdr_len = (self.ihl_words as usize) * 4;
        if hdr_len < Self::MIN_SIZE || buf.len() < hdr_len {
            return Err(Error::BufferOverflow);
        }

        let (hdr_buf, payload_buf) = buf.split_at_mut(hdr_len);
        let payload_len = encoder(payload_buf)?;

        let total = hdr_len + payload_len;
        self.total_len = total as u16;

        self.encode(hdr_buf)?;
        hdr_buf[Self::MIN_SIZE..hdr_len].fill(0);

        let checksum = Self::checksum(hdr_buf);
        self.checksum = checksum;
        Self::inject_checksum(hdr_buf, checksum);

        Ok(&buf[..total])
    }

    pub fn decode_with_payload(
        packet: &[u8],
        filter_src: Ipv4Addr,
        filter_dst: Ipv4Addr,
        filter_proto: Option<u8>,
    ) -> Result<Option<(Self, &[u8])>, Error> {
        let hdr = Self::decode(packet)?;

        if !filter_src.is_unspecified() && !hdr.src.is_broadcast() && filter_src != hdr.src {
            return Ok(None);
        }

        if !filter_dst.is_unspecified() && !hdr.dst.is_broadcast() && filter_dst != hdr.dst {
            return Ok(None);
        }

        if let Some(want) = filter_proto {
            if want != hdr.proto {
                return Ok(None);
            }
        }

        let len = hdr.total_len as usize;
        if packet.len() < len {
            return Err(Error::DataUnderflow);
        }

        let checksum = Self::checksum(&packet[..len]);
        trace!(
            "ip header: src={} dst={} proto={} len={} checksum={:#06x} computed={:#06x}",
            hdr.src,
            hdr.dst,
            hdr.proto,
            hdr.total_len,
            hdr.checksum,
            checksum
        );

        if checksum != hdr.checksum {
            return Err(Error::InvalidChecksum);
        }

        let packet = &packet[..len];
        let hdr_len = (hdr.ihl_words as usize) * 4;
        if packet.len() < hdr_len {
            return Err(Error::DataUnderflow);
        }

        Ok(Some((hdr, &packet[hdr_len..])))
    }

    pub fn inject_checksum(packet: &mut [u8], checksum: u16) {
        let bytes = checksum.to_be_bytes();
        let offset = Self::CHECKSUM_WORD * 2;
        packet[offset] = bytes[0];
        packet[offset + 1] = bytes[1];
    }

    pub fn checksum(packet: &[u8]) -> u16 {
        let hlen = (packet[0] & 0x0f) as usize * 4;
        let sum = checksum_accumulate(&packet[..hlen], Self::CHECKSUM_WORD);

        checksum_finish(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_without_options() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(255, 255, 255, 255);

        let mut buf = [0u8; 64];
        let packet = encode(&mut buf, src, dst, 17, |payload| {
            payload[..4].copy_from_slice(b"ABCD");
            Ok(4)
        })
        .unwrap();

        let (got_src, got_dst, proto, payload) =
            decode(packet, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, None)
                .unwrap()
                .unwrap();

        assert_eq!(got_src, src);
        assert_eq!(got_dst, dst);
        assert_eq!(proto, 17);
        assert_eq!(payload, b"ABCD");
    }
}
