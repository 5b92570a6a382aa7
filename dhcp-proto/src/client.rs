//! Builders for the messages a DHCP client sends, and the predicates it
//! uses to recognize a server's reply. The retransmission schedule and
//! state machine that drive these live in the `dhcpc` binary; this module
//! only knows how to shape one packet at a time.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::options::code;
use crate::{DhcpOption, MessageType, Packet};

/// Options requested by default when none are configured explicitly.
pub const DEFAULT_PARAMS: &[u8] = &[
    code::SUBNET_MASK,
    code::ROUTER,
    code::DOMAIN_NAME_SERVER,
    code::DOMAIN_NAME,
    code::BROADCAST_ADDRESS,
    code::HOST_NAME,
];

/// Per-client identity carried on every outbound message.
#[derive(Clone, Debug)]
pub struct Identity<'a> {
    pub mac: [u8; 6],
    pub client_id: Option<&'a [u8]>,
    pub hostname: Option<&'a str>,
    pub params: &'a [u8],
}

impl<'a> Identity<'a> {
    fn common_options(&self, message_type: MessageType) -> Vec<DhcpOption<'a>> {
        let mut opts = vec![DhcpOption::MessageType(message_type)];

        if let Some(id) = self.client_id {
            opts.push(DhcpOption::ClientIdentifier(id));
        }
        if let Some(name) = self.hostname {
            opts.push(DhcpOption::HostName(name));
        }

        opts
    }
}

/// Builds a DHCPDISCOVER. `requested_ip` carries a prior lease across a
/// reboot (RFC 2131 §4.3.1) but is advisory; servers may ignore it.
pub fn discover<'a>(
    xid: u32,
    secs: u16,
    identity: &Identity<'a>,
    requested_ip: Option<Ipv4Addr>,
) -> (Packet<'static>, Vec<DhcpOption<'a>>) {
    let packet = Packet::new_request(xid, secs, identity.mac, true);

    let mut opts = identity.common_options(MessageType::Discover);
    if let Some(ip) = requested_ip {
        opts.push(DhcpOption::RequestedIpAddress(ip));
    }
    opts.push(DhcpOption::ParameterRequestList(identity.params));

    (packet, opts)
}

/// DHCPREQUEST in the Selecting state: answers a specific server's OFFER.
pub fn request_selecting<'a>(
    xid: u32,
    secs: u16,
    identity: &Identity<'a>,
    server_id: Ipv4Addr,
    requested_ip: Ipv4Addr,
) -> (Packet<'static>, Vec<DhcpOption<'a>>) {
    let packet = Packet::new_request(xid, secs, identity.mac, true);

    let mut opts = identity.common_options(MessageType::Request);
    opts.push(DhcpOption::RequestedIpAddress(requested_ip));
    opts.push(DhcpOption::ServerIdentifier(server_id));
    opts.push(DhcpOption::ParameterRequestList(identity.params));

    (packet, opts)
}

/// DHCPREQUEST in the Init-Reboot state: no server chosen yet, just a
/// remembered lease.
pub fn request_init_reboot<'a>(
    xid: u32,
    secs: u16,
    identity: &Identity<'a>,
    requested_ip: Ipv4Addr,
) -> (Packet<'static>, Vec<DhcpOption<'a>>) {
    let packet = Packet::new_request(xid, secs, identity.mac, true);

    let mut opts = identity.common_options(MessageType::Request);
    opts.push(DhcpOption::RequestedIpAddress(requested_ip));
    opts.push(DhcpOption::ParameterRequestList(identity.params));

    (packet, opts)
}

/// DHCPREQUEST while Renewing (unicast) or Rebinding (broadcast): `ciaddr`
/// is set on the packet itself, not carried as an option.
pub fn request_renew<'a>(
    xid: u32,
    secs: u16,
    identity: &Identity<'a>,
    ciaddr: Ipv4Addr,
    broadcast: bool,
) -> (Packet<'static>, Vec<DhcpOption<'a>>) {
    let mut packet = Packet::new_request(xid, secs, identity.mac, broadcast);
    packet.ciaddr = ciaddr;

    let mut opts = identity.common_options(MessageType::Request);
    opts.push(DhcpOption::ParameterRequestList(identity.params));

    (packet, opts)
}

pub fn release<'a>(
    xid: u32,
    identity: &Identity<'a>,
    ciaddr: Ipv4Addr,
    server_id: Ipv4Addr,
) -> (Packet<'static>, Vec<DhcpOption<'a>>) {
    let mut packet = Packet::new_request(xid, 0, identity.mac, false);
    packet.ciaddr = ciaddr;

    let mut opts = identity.common_options(MessageType::Release);
    opts.push(DhcpOption::ServerIdentifier(server_id));

    (packet, opts)
}

pub fn decline<'a>(
    xid: u32,
    identity: &Identity<'a>,
    requested_ip: Ipv4Addr,
    server_id: Ipv4Addr,
) -> (Packet<'static>, Vec<DhcpOption<'a>>) {
    let packet = Packet::new_request(xid, 0, identity.mac, true);

    let mut opts = identity.common_options(MessageType::Decline);
    opts.push(DhcpOption::RequestedIpAddress(requested_ip));
    opts.push(DhcpOption::ServerIdentifier(server_id));

    (packet, opts)
}

fn is_reply_for(reply: &Packet<'_>, xid: u32, mac: [u8; 6], message_type: MessageType) -> bool {
    reply.is_for_us(xid, mac) && reply.options.message_type() == Some(message_type)
}

pub fn is_offer(reply: &Packet<'_>, xid: u32, mac: [u8; 6]) -> bool {
    is_reply_for(reply, xid, mac, MessageType::Offer)
}

pub fn is_ack(reply: &Packet<'_>, xid: u32, mac: [u8; 6]) -> bool {
    is_reply_for(reply, xid, mac, MessageType::Ack)
}

pub fn is_nak(reply: &Packet<'_>, xid: u32, mac: [u8; 6]) -> bool {
    is_reply_for(reply, xid, mac, MessageType::Nak)
}

/// The negotiated configuration extracted from an ACK, handed to the
/// script hook and used to compute the renewal timers.
#[derive(Clone, Debug)]
pub struct Settings {
    pub ip: Ipv4Addr,
    pub server_id: Option<Ipv4Addr>,
    pub lease: Duration,
    pub subnet: Option<Ipv4Addr>,
    pub routers: Vec<Ipv4Addr>,
    pub dns: Vec<Ipv4Addr>,
    pub domain: Option<String>,
    pub broadcast: Option<Ipv4Addr>,
    pub hostname: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            server_id: None,
            lease: Duration::default(),
            subnet: None,
            routers: Vec::new(),
            dns: Vec::new(),
            domain: None,
            broadcast: None,
            hostname: None,
        }
    }
}

impl Settings {
    pub fn from_ack(ack: &Packet<'_>, default_lease: Duration) -> Self {
        let opts = &ack.options;

        Self {
            ip: ack.yiaddr,
            server_id: opts.server_identifier(),
            lease: opts
                .lease_time()
                .map(|s| Duration::from_secs(s as u64))
                .unwrap_or(default_lease),
            subnet: opts.get(code::SUBNET_MASK).and_then(ipv4),
            routers: opts
                .get(code::ROUTER)
                .map(|d| crate::Ipv4List::new(d).iter().collect())
                .unwrap_or_default(),
            dns: opts
                .get(code::DOMAIN_NAME_SERVER)
                .map(|d| crate::Ipv4List::new(d).iter().collect())
                .unwrap_or_default(),
            domain: opts
                .get(code::DOMAIN_NAME)
                .and_then(|d| std::str::from_utf8(d).ok())
                .map(String::from),
            broadcast: opts.get(code::BROADCAST_ADDRESS).and_then(ipv4),
            hostname: opts.host_name().map(String::from),
        }
    }
}

fn ipv4(data: &[u8]) -> Option<Ipv4Addr> {
    (data.len() >= 4).then(|| Ipv4Addr::new(data[0], data[1], data[2], data[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_round_trips_to_a_valid_packet() {
        let identity = Identity {
            mac: [1, 2, 3, 4, 5, 6],
            client_id: None,
            hostname: Some("host1"),
            params: DEFAULT_PARAMS,
        };

        let (packet, opts) = discover(7, 0, &identity, None);
        let mut buf = [0u8; 576];
        let encoded = packet.encode(&mut buf, &opts).unwrap();
        let decoded = Packet::decode(encoded).unwrap();

        assert_eq!(decoded.options.message_type(), Some(MessageType::Discover));
        assert_eq!(decoded.options.host_name(), Some("host1"));
    }

    #[test]
    fn settings_pulls_lease_and_dns_from_ack() {
        let mut reply = Packet::new_request(1, 0, [1, 2, 3, 4, 5, 6], false);
        reply.reply = true;
        reply.yiaddr = Ipv4Addr::new(192, 168, 1, 50);

        let opts = [
            DhcpOption::MessageType(MessageType::Ack),
            DhcpOption::IpAddressLeaseTime(7200),
            DhcpOption::DomainNameServer(crate::Ipv4List::new(&[8, 8, 8, 8])),
        ];
        let mut buf = [0u8; 576];
        let encoded = reply.encode(&mut buf, &opts).unwrap();
        let decoded = Packet::decode(encoded).unwrap();

        let settings = Settings::from_ack(&decoded, Duration::from_secs(3600));
        assert_eq!(settings.ip, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(settings.lease, Duration::from_secs(7200));
        assert_eq!(settings.dns, vec![Ipv4Addr::new(8, 8, 8, 8)]);
    }
}
