//! The 236-byte BOOTP header plus the DHCP option area (RFC 2131 §2).

use std::net::{Ipv4Addr, SocketAddrV4};

use dhcp_raw::bytes::{Reader, Writer};

use crate::options::{self, Options};
use crate::Error;

pub const COOKIE: [u8; 4] = [99, 130, 83, 99];
pub const BOOT_REQUEST: u8 = 1;
pub const BOOT_REPLY: u8 = 2;
pub const ETH_HTYPE: u8 = 1;
pub const ETH_HLEN: u8 = 6;

const OVERLOAD_FILE: u8 = 1;
const OVERLOAD_SNAME: u8 = 2;

const FIXED_HEADER_LEN: usize = 1 + 1 + 1 + 1 + 4 + 2 + 2 + 4 + 4 + 4 + 4 + 16 + 64 + 128;
const MIN_PACKET_LEN: usize = FIXED_HEADER_LEN + COOKIE.len();
/// Minimum size clients pad a request to, matching common server
/// expectations that predate option-length negotiation.
pub const MIN_ENCODED_LEN: usize = 300;

const SNAME_LEN: usize = 64;
const FILE_LEN: usize = 128;

/// A decoded (or to-be-encoded) DHCP/BOOTP message.
#[derive(Clone, Debug)]
pub struct Packet<'a> {
    pub reply: bool,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub broadcast: bool,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub hlen: u8,
    pub sname: &'a [u8],
    pub file: &'a [u8],
    pub options: Options<'a>,
}

impl<'a> Packet<'a> {
    /// Builds a client-originated request (DISCOVER/REQUEST/RELEASE/DECLINE).
    pub fn new_request(xid: u32, secs: u16, mac: [u8; 6], broadcast: bool) -> Self {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&mac);

        Self {
            reply: false,
            hops: 0,
            xid,
            secs,
            broadcast,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            hlen: ETH_HLEN,
            sname: &[],
            file: &[],
            options: Options::new(),
        }
    }

    /// Builds a server reply echoing the addressing fields of `request`.
    pub fn new_reply(request: &Packet<'_>, yiaddr: Ipv4Addr) -> Packet<'static> {
        Packet {
            reply: true,
            hops: 0,
            xid: request.xid,
            secs: 0,
            broadcast: request.broadcast,
            ciaddr: request.ciaddr,
            yiaddr,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            hlen: request.hlen,
            sname: &[],
            file: &[],
            options: Options::new(),
        }
    }

    pub fn decode(data: &'a [u8]) -> Result<Self, Error> {
        if data.len() < MIN_PACKET_LEN {
            return Err(Error::DataUnderflow);
        }

        let mut r = Reader::new(data);

        let op = r.byte()?;
        let _htype = r.byte()?;
        let hlen = r.byte()?;
        if hlen as usize > 16 {
            return Err(Error::InvalidHlen);
        }
        let hops = r.byte()?;
        let xid = u32::from_be_bytes(r.array()?);
        let secs = u16::from_be_bytes(r.array()?);
        let flags = u16::from_be_bytes(r.array()?);
        let ciaddr = u32::from_be_bytes(r.array()?).into();
        let yiaddr = u32::from_be_bytes(r.array()?).into();
        let siaddr = u32::from_be_bytes(r.array()?).into();
        let giaddr = u32::from_be_bytes(r.array()?).into();
        let chaddr: [u8; 16] = r.array()?;
        let sname = r.slice(SNAME_LEN)?;
        let file = r.slice(FILE_LEN)?;
        let cookie: [u8; 4] = r.array()?;
        if cookie != COOKIE {
            return Err(Error::MissingCookie);
        }

        let options_area = r.rest();

        let mut options = Options::new();
        let overload = options.decode_area(options_area)?;

        if let Some(overload) = overload {
            if overload & OVERLOAD_FILE != 0 {
                options.decode_area(file)?;
            }
            if overload & OVERLOAD_SNAME != 0 {
                options.decode_area(sname)?;
            }
        }

        Ok(Self {
            reply: op == BOOT_REPLY,
            hops,
            xid,
            secs,
            broadcast: flags & 0x8000 != 0,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            hlen,
            sname,
            file,
            options,
        })
    }

    pub fn encode<'o>(&self, buf: &'o mut [u8], options: &[crate::DhcpOption<'_>]) -> Result<&'o [u8], Error> {
        if buf.len() < MIN_PACKET_LEN {
            return Err(Error::BufferOverflow);
        }

        let op = if self.reply { BOOT_REPLY } else { BOOT_REQUEST };
        let flags: u16 = if self.broadcast { 0x8000 } else { 0 };

        let mut w = Writer::new(buf);
        w.byte(op)?
            .byte(ETH_HTYPE)?
            .byte(self.hlen)?
            .byte(self.hops)?
            .bytes(&self.xid.to_be_bytes())?
            .bytes(&self.secs.to_be_bytes())?
            .bytes(&flags.to_be_bytes())?
            .bytes(&u32::from(self.ciaddr).to_be_bytes())?
            .bytes(&u32::from(self.yiaddr).to_be_bytes())?
            .bytes(&u32::from(self.siaddr).to_be_bytes())?
            .bytes(&u32::from(self.giaddr).to_be_bytes())?
            .bytes(&self.chaddr)?
            .bytes(&[0u8; SNAME_LEN])?
            .bytes(&[0u8; FILE_LEN])?
            .bytes(&COOKIE)?;

        let header_len = w.len();
        debug_assert_eq!(header_len, MIN_PACKET_LEN);

        let options_len = options::encode_options(options, &mut buf[header_len..])?;

        let total = (header_len + options_len).max(MIN_ENCODED_LEN.min(buf.len()));
        if total > buf.len() {
            return Ok(&buf[..header_len + options_len]);
        }

        // pad the tail so short option lists still meet the legacy minimum size
        for b in buf[header_len + options_len..total].iter_mut() {
            *b = 0;
        }

        Ok(&buf[..total])
    }

    /// `true` when this packet's destination hardware/transaction id could
    /// plausibly be a reply to a request we sent with this `xid`.
    pub fn is_for_us(&self, xid: u32, mac: [u8; 6]) -> bool {
        self.reply && self.xid == xid && self.chaddr[..6] == mac
    }

    pub fn decode_raw(
        data: &'a [u8],
        filter_src_port: Option<u16>,
        filter_dst_port: Option<u16>,
    ) -> Result<Option<(SocketAddrV4, SocketAddrV4, Self)>, Error> {
        let Some((src, dst, payload)) = dhcp_raw::ip_udp_decode(
            data,
            filter_src_port.map(|p| SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, p)),
            filter_dst_port.map(|p| SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, p)),
        )?
        else {
            return Ok(None);
        };

        Ok(Some((src, dst, Self::decode(payload)?)))
    }

    pub fn encode_raw<'o>(
        &self,
        src: SocketAddrV4,
        dst: SocketAddrV4,
        options: &[crate::DhcpOption<'_>],
        buf: &'o mut [u8],
    ) -> Result<&'o [u8], Error> {
        let mut packet_buf = [0u8; 576];
        let encoded_len = self.encode(&mut packet_buf, options)?.len();

        let out = dhcp_raw::ip_udp_encode(buf, src, dst, |payload| {
            if encoded_len > payload.len() {
                return Err(dhcp_raw::Error::BufferOverflow);
            }
            payload[..encoded_len].copy_from_slice(&packet_buf[..encoded_len]);
            Ok(encoded_len)
        })?;

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DhcpOption;

    #[test]
    fn round_trips_a_discover() {
        let pkt = Packet::new_request(0x1234_5678, 0, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01], true);

        let opts = [
            DhcpOption::MessageType(crate::MessageType::Discover),
            DhcpOption::ParameterRequestList(&[1, 3, 6]),
        ];

        let mut buf = [0u8; 576];
        let encoded = pkt.encode(&mut buf, &opts).unwrap();

        let decoded = Packet::decode(encoded).unwrap();
        assert_eq!(decoded.xid, 0x1234_5678);
        assert!(decoded.broadcast);
        assert_eq!(decoded.chaddr[..6], [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        assert_eq!(
            decoded.options.message_type(),
            Some(crate::MessageType::Discover)
        );
    }

    #[test]
    fn rejects_missing_cookie() {
        let buf = [0u8; MIN_PACKET_LEN];
        assert!(matches!(Packet::decode(&buf), Err(Error::MissingCookie)));
    }

    #[test]
    fn honors_option_overload() {
        let mut pkt = Packet::new_request(1, 0, [1, 2, 3, 4, 5, 6], false);
        pkt.file = b"\x35\x01\x01\xff"; // DHCPDISCOVER crammed into `file`

        let mut header = [0u8; MIN_PACKET_LEN];
        let mut w = Writer::new(&mut header);
        w.byte(BOOT_REQUEST)
            .unwrap()
            .byte(ETH_HTYPE)
            .unwrap()
            .byte(ETH_HLEN)
            .unwrap()
            .byte(0)
            .unwrap()
            .bytes(&1u32.to_be_bytes())
            .unwrap()
            .bytes(&0u16.to_be_bytes())
            .unwrap()
            .bytes(&0u16.to_be_bytes())
            .unwrap()
            .bytes(&[0u8; 4])
            .unwrap()
            .bytes(&[0u8; 4])
            .unwrap()
            .bytes(&[0u8; 4])
            .unwrap()
            .bytes(&[0u8; 4])
            .unwrap()
            .bytes(&pkt.chaddr)
            .unwrap()
            .bytes(&[0u8; SNAME_LEN])
            .unwrap();

        let mut file_area = [0u8; FILE_LEN];
        file_area[..4].copy_from_slice(pkt.file);
        w.bytes(&file_area).unwrap();
        w.bytes(&COOKIE).unwrap();

        // options area: just OPTION_OVERLOAD=1 (file) then END
        let mut full = header.to_vec();
        full.push(options::code::OPTION_OVERLOAD);
        full.push(1);
        full.push(OVERLOAD_FILE);
        full.push(options::END);

        let decoded = Packet::decode(&full).unwrap();
        assert_eq!(decoded.options.message_type(), Some(crate::MessageType::Discover));
    }
}
