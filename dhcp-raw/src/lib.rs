//! IPv4 + UDP header encode/decode and checksum helpers for the DHCP raw
//! link-layer transport. A DHCP client that has not yet been assigned an
//! address cannot receive a kernel-routed UDP datagram, so the server and
//! client both need to speak IP and UDP by hand over an `AF_PACKET` socket.

pub mod bytes;
pub mod ip;
pub mod udp;

use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Reader;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    DataUnderflow,
    BufferOverflow,
    InvalidFormat,
    InvalidChecksum,
}

impl From<bytes::Error> for Error {
    fn from(value: bytes::Error) -> Self {
        match value {
            bytes::Error::BufferOverflow => Self::BufferOverflow,
            bytes::Error::DataUnderflow => Self::DataUnderflow,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DataUnderflow => "data underflow",
            Self::BufferOverflow => "buffer overflow",
            Self::InvalidFormat => "invalid format",
            Self::InvalidChecksum => "invalid checksum",
        };

        write!(f, "{s}")
    }
}

impl std::error::Error for Error {}

/// Decodes an IPv4 packet carrying a UDP payload, filtering by source/dest
/// socket address. `Ok(None)` means the packet did not match the filters
/// (not an error: the caller should keep reading).
pub fn ip_udp_decode(
    packet: &[u8],
    filter_src: Option<SocketAddrV4>,
    filter_dst: Option<SocketAddrV4>,
) -> Result<Option<(SocketAddrV4, SocketAddrV4, &[u8])>, Error> {
    let Some((src, dst, _proto, udp_packet)) = ip::decode(
        packet,
        filter_src.map(|a| *a.ip()).unwrap_or(Ipv4Addr::UNSPECIFIED),
        filter_dst.map(|a| *a.ip()).unwrap_or(Ipv4Addr::UNSPECIFIED),
        Some(udp::UdpHeader::PROTO),
    )?
    else {
        return Ok(None);
    };

    udp::decode(
        src,
        dst,
        udp_packet,
        filter_src.map(|a| a.port()),
        filter_dst.map(|a| a.port()),
    )
}

/// Encodes a UDP payload inside an IPv4 packet. `encoder` writes the UDP
/// payload into the space remaining after the IP and UDP headers and
/// returns the number of bytes written.
pub fn ip_udp_encode<F>(
    buf: &mut [u8],
    src: SocketAddrV4,
    dst: SocketAddrV4,
    encoder: F,
) -> Result<&[u8], Error>
where
    F: FnOnce(&mut [u8]) -> Result<usize, Error>,
{
    ip::encode(buf, *src.ip(), *dst.ip(), udp::UdpHeader::PROTO, |buf| {
        Ok(udp::encode(buf, src, dst, encoder)?.len())
    })
}

/// RFC 1071 ones-complement sum accumulation. `checksum_word` names the
/// 16-bit word index (0-based) to treat as zero while summing, used to
/// exclude the checksum field itself when verifying an already-encoded
/// packet.
pub fn checksum_accumulate(bytes: &[u8], checksum_word: usize) -> u32 {
    let mut reader = Reader::new(bytes);

    let mut sum: u32 = 0;
    while reader.remaining_len() > 0 {
        let skip = (reader.pos() >> 1) == checksum_word;
        let word = if reader.remaining_len() >= 2 {
            let arr = reader.array::<2>().unwrap();
            u16::from_be_bytes(arr)
        } else {
            (reader.byte().unwrap() as u16) << 8
        };

        if !skip {
            sum += word as u32;
        }
    }

    sum
}

pub fn checksum_finish(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xffff);
    }

    !sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_all_zero_is_all_ones() {
        let buf = [0u8; 20];
        let sum = checksum_accumulate(&buf, usize::MAX);
        assert_eq!(checksum_finish(sum), 0xffff);
    }
}
