//! RFC 2131/2132 wire codec, lease store and the server/client decision
//! logic that sits on top of it. Transport (raw link-layer vs kernel UDP)
//! lives in `dhcp-net`; this crate only knows about bytes and addresses.

pub mod client;
pub mod options;
pub mod packet;
pub mod server;

pub use options::{code, DhcpOption, Ipv4List, MessageType, Options};
pub use packet::Packet;

use std::str::Utf8Error;

#[derive(Debug)]
pub enum Error {
    DataUnderflow,
    BufferOverflow,
    InvalidUtf8(Utf8Error),
    InvalidMessageType,
    MissingCookie,
    InvalidHlen,
    InvalidPacket,
    Raw(dhcp_raw::Error),
}

impl From<dhcp_raw::Error> for Error {
    fn from(value: dhcp_raw::Error) -> Self {
        Self::Raw(value)
    }
}

impl From<dhcp_raw::bytes::Error> for Error {
    fn from(value: dhcp_raw::bytes::Error) -> Self {
        match value {
            dhcp_raw::bytes::Error::DataUnderflow => Self::DataUnderflow,
            dhcp_raw::bytes::Error::BufferOverflow => Self::BufferOverflow,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataUnderflow => write!(f, "data underflow"),
            Self::BufferOverflow => write!(f, "buffer overflow"),
            Self::InvalidUtf8(e) => write!(f, "invalid utf8: {e}"),
            Self::InvalidMessageType => write!(f, "invalid or missing message type"),
            Self::MissingCookie => write!(f, "missing magic cookie"),
            Self::InvalidHlen => write!(f, "invalid hardware address length"),
            Self::InvalidPacket => write!(f, "malformed packet"),
            Self::Raw(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}
