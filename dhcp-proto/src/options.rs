//! The DHCP option type registry (RFC 2132) and the option list codec.

use std::net::Ipv4Addr;
use std::str::Utf8Error;

use num_enum::TryFromPrimitive;

use crate::Error;

pub const PAD: u8 = 0;
pub const END: u8 = 255;

/// Option codes this implementation understands. Anything else round-trips
/// as [`DhcpOption::Unrecognized`].
pub mod code {
    pub const SUBNET_MASK: u8 = 1;
    pub const TIME_OFFSET: u8 = 2;
    pub const ROUTER: u8 = 3;
    pub const DOMAIN_NAME_SERVER: u8 = 6;
    pub const HOST_NAME: u8 = 12;
    pub const DOMAIN_NAME: u8 = 15;
    pub const BROADCAST_ADDRESS: u8 = 28;
    pub const REQUESTED_IP_ADDRESS: u8 = 50;
    pub const IP_ADDRESS_LEASE_TIME: u8 = 51;
    pub const OPTION_OVERLOAD: u8 = 52;
    pub const DHCP_MESSAGE_TYPE: u8 = 53;
    pub const SERVER_IDENTIFIER: u8 = 54;
    pub const PARAMETER_REQUEST_LIST: u8 = 55;
    pub const MESSAGE: u8 = 56;
    pub const MAX_MESSAGE_SIZE: u8 = 57;
    pub const RENEWAL_TIME: u8 = 58;
    pub const REBINDING_TIME: u8 = 59;
    pub const CLIENT_IDENTIFIER: u8 = 61;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

/// An iterator over a `&[u8]` four bytes at a time, each yielded as an
/// [`Ipv4Addr`]. Used for list-valued options such as `ROUTER` and `DNS`.
#[derive(Copy, Clone, Debug)]
pub struct Ipv4List<'a>(&'a [u8]);

impl<'a> Ipv4List<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self(data)
    }

    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + 'a {
        self.0
            .chunks_exact(4)
            .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
    }

    pub fn first(&self) -> Option<Ipv4Addr> {
        self.iter().next()
    }
}

/// A single typed DHCP option. Variants cover the registry this
/// implementation reads or writes; anything else decodes to `Unrecognized`
/// and is preserved byte-for-byte.
#[derive(Clone, Debug)]
pub enum DhcpOption<'a> {
    SubnetMask(Ipv4Addr),
    TimeOffset(u32),
    Router(Ipv4List<'a>),
    DomainNameServer(Ipv4List<'a>),
    HostName(&'a str),
    DomainName(&'a str),
    BroadcastAddress(Ipv4Addr),
    RequestedIpAddress(Ipv4Addr),
    IpAddressLeaseTime(u32),
    OptionOverload(u8),
    MessageType(MessageType),
    ServerIdentifier(Ipv4Addr),
    ParameterRequestList(&'a [u8]),
    Message(&'a str),
    MaxMessageSize(u16),
    RenewalTime(u32),
    RebindingTime(u32),
    ClientIdentifier(&'a [u8]),
    Unrecognized(u8, &'a [u8]),
}

impl<'a> DhcpOption<'a> {
    pub fn code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => code::SUBNET_MASK,
            Self::TimeOffset(_) => code::TIME_OFFSET,
            Self::Router(_) => code::ROUTER,
            Self::DomainNameServer(_) => code::DOMAIN_NAME_SERVER,
            Self::HostName(_) => code::HOST_NAME,
            Self::DomainName(_) => code::DOMAIN_NAME,
            Self::BroadcastAddress(_) => code::BROADCAST_ADDRESS,
            Self::RequestedIpAddress(_) => code::REQUESTED_IP_ADDRESS,
            Self::IpAddressLeaseTime(_) => code::IP_ADDRESS_LEASE_TIME,
            Self::OptionOverload(_) => code::OPTION_OVERLOAD,
            Self::MessageType(_) => code::DHCP_MESSAGE_TYPE,
            Self::ServerIdentifier(_) => code::SERVER_IDENTIFIER,
            Self::ParameterRequestList(_) => code::PARAMETER_REQUEST_LIST,
            Self::Message(_) => code::MESSAGE,
            Self::MaxMessageSize(_) => code::MAX_MESSAGE_SIZE,
            Self::RenewalTime(_) => code::RENEWAL_TIME,
            Self::RebindingTime(_) => code::REBINDING_TIME,
            Self::ClientIdentifier(_) => code::CLIENT_IDENTIFIER,
            Self::Unrecognized(c, _) => *c,
        }
    }

    fn ipv4(data: &[u8]) -> Result<Ipv4Addr, Error> {
        if data.len() < 4 {
            return Err(Error::DataUnderflow);
        }
        Ok(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
    }

    fn u32(data: &[u8]) -> Result<u32, Error> {
        if data.len() < 4 {
            return Err(Error::DataUnderflow);
        }
        Ok(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
    }

    fn u16(data: &[u8]) -> Result<u16, Error> {
        if data.len() < 2 {
            return Err(Error::DataUnderflow);
        }
        Ok(u16::from_be_bytes([data[0], data[1]]))
    }

    fn str(data: &'a [u8]) -> Result<&'a str, Error> {
        std::str::from_utf8(data).map_err(Error::InvalidUtf8)
    }

    pub fn decode(code: u8, data: &'a [u8]) -> Result<Self, Error> {
        Ok(match code {
            code::SUBNET_MASK => Self::SubnetMask(Self::ipv4(data)?),
            code::TIME_OFFSET => Self::TimeOffset(Self::u32(data)?),
            code::ROUTER => Self::Router(Ipv4List::new(data)),
            code::DOMAIN_NAME_SERVER => Self::DomainNameServer(Ipv4List::new(data)),
            code::HOST_NAME => Self::HostName(Self::str(data)?),
            code::DOMAIN_NAME => Self::DomainName(Self::str(data)?),
            code::BROADCAST_ADDRESS => Self::BroadcastAddress(Self::ipv4(data)?),
            code::REQUESTED_IP_ADDRESS => Self::RequestedIpAddress(Self::ipv4(data)?),
            code::IP_ADDRESS_LEASE_TIME => Self::IpAddressLeaseTime(Self::u32(data)?),
            code::OPTION_OVERLOAD => {
                Self::OptionOverload(*data.first().ok_or(Error::DataUnderflow)?)
            }
            code::DHCP_MESSAGE_TYPE => {
                let byte = *data.first().ok_or(Error::DataUnderflow)?;
                Self::MessageType(
                    MessageType::try_from(byte).map_err(|_| Error::InvalidMessageType)?,
                )
            }
            code::SERVER_IDENTIFIER => Self::ServerIdentifier(Self::ipv4(data)?),
            code::PARAMETER_REQUEST_LIST => Self::ParameterRequestList(data),
            code::MESSAGE => Self::Message(Self::str(data)?),
            code::MAX_MESSAGE_SIZE => Self::MaxMessageSize(Self::u16(data)?),
            code::RENEWAL_TIME => Self::RenewalTime(Self::u32(data)?),
            code::REBINDING_TIME => Self::RebindingTime(Self::u32(data)?),
            code::CLIENT_IDENTIFIER => Self::ClientIdentifier(data),
            other => Self::Unrecognized(other, data),
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        let code = self.code();

        let mut payload = Vec::new();
        match self {
            Self::SubnetMask(ip)
            | Self::BroadcastAddress(ip)
            | Self::RequestedIpAddress(ip)
            | Self::ServerIdentifier(ip) => payload.extend_from_slice(&ip.octets()),
            Self::TimeOffset(v) | Self::IpAddressLeaseTime(v) | Self::RenewalTime(v)
            | Self::RebindingTime(v) => payload.extend_from_slice(&v.to_be_bytes()),
            Self::Router(list) | Self::DomainNameServer(list) => {
                for ip in list.iter() {
                    payload.extend_from_slice(&ip.octets());
                }
            }
            Self::HostName(s) | Self::DomainName(s) | Self::Message(s) => {
                payload.extend_from_slice(s.as_bytes())
            }
            Self::OptionOverload(v) => payload.push(*v),
            Self::MessageType(mt) => payload.push(*mt as u8),
            Self::ParameterRequestList(codes) | Self::ClientIdentifier(codes) => {
                payload.extend_from_slice(codes)
            }
            Self::MaxMessageSize(v) => payload.extend_from_slice(&v.to_be_bytes()),
            Self::Unrecognized(_, data) => payload.extend_from_slice(data),
        }

        buf.push(code);
        buf.push(payload.len() as u8);
        buf.extend_from_slice(&payload);
    }
}

/// A decoded option list: raw `(code, data)` pairs referencing the original
/// packet buffer, in the order they were read (overloaded `file`/`sname`
/// entries, if any, are appended after the `options` area).
#[derive(Clone, Debug, Default)]
pub struct Options<'a> {
    entries: Vec<(u8, &'a [u8])>,
}

impl<'a> Options<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one TLV area, stopping at `END` or end-of-buffer. `PAD` bytes
    /// are skipped. Returns `Some(overload)` if option 52 was present.
    pub(crate) fn decode_area(&mut self, mut data: &'a [u8]) -> Result<Option<u8>, Error> {
        let mut overload = None;

        while !data.is_empty() {
            let code = data[0];
            if code == PAD {
                data = &data[1..];
                continue;
            }
            if code == END {
                break;
            }

            if data.len() < 2 {
                return Err(Error::DataUnderflow);
            }
            let len = data[1] as usize;
            if data.len() < 2 + len {
                return Err(Error::DataUnderflow);
            }

            let value = &data[2..2 + len];
            if code == code::OPTION_OVERLOAD {
                overload = value.first().copied();
            }

            self.entries.push((code, value));
            data = &data[2 + len..];
        }

        Ok(overload)
    }

    pub fn get(&self, code: u8) -> Option<&'a [u8]> {
        self.entries.iter().find(|(c, _)| *c == code).map(|(_, d)| *d)
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<DhcpOption<'a>, Error>> + '_ {
        self.entries
            .iter()
            .map(|(code, data)| DhcpOption::decode(*code, data))
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.get(code::DHCP_MESSAGE_TYPE)
            .and_then(|d| d.first())
            .and_then(|b| MessageType::try_from(*b).ok())
    }

    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.get(code::REQUESTED_IP_ADDRESS)
            .and_then(|d| DhcpOption::ipv4(d).ok())
    }

    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.get(code::SERVER_IDENTIFIER)
            .and_then(|d| DhcpOption::ipv4(d).ok())
    }

    pub fn lease_time(&self) -> Option<u32> {
        self.get(code::IP_ADDRESS_LEASE_TIME)
            .and_then(|d| DhcpOption::u32(d).ok())
    }

    pub fn parameter_request_list(&self) -> Option<&'a [u8]> {
        self.get(code::PARAMETER_REQUEST_LIST)
    }

    pub fn host_name(&self) -> Option<&'a str> {
        self.get(code::HOST_NAME).and_then(|d| std::str::from_utf8(d).ok())
    }

    pub fn client_identifier(&self) -> Option<&'a [u8]> {
        self.get(code::CLIENT_IDENTIFIER)
    }
}

/// Encodes a list of options into `buf`, always writing a trailing `END`.
pub fn encode_options(options: &[DhcpOption<'_>], buf: &mut [u8]) -> Result<usize, Error> {
    let mut out = Vec::new();
    for opt in options {
        opt.encode(&mut out);
    }
    out.push(END);

    if out.len() > buf.len() {
        return Err(Error::BufferOverflow);
    }
    buf[..out.len()].copy_from_slice(&out);

    Ok(out.len())
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Error::InvalidUtf8(value)
    }
}
