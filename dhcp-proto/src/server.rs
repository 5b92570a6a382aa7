//! The server-side lease store and the DISCOVER/REQUEST/DECLINE/RELEASE/
//! INFORM decision logic.

use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime};

use log::{debug, warn};

use crate::options::code;
use crate::{DhcpOption, MessageType, Packet};

/// A single MAC -> IP binding with an absolute expiry.
#[derive(Clone, Debug)]
pub struct Lease {
    pub chaddr: [u8; 16],
    pub yiaddr: Ipv4Addr,
    pub expires: SystemTime,
}

impl Lease {
    fn is_active(&self, now: SystemTime) -> bool {
        self.expires > now
    }

    fn matches_mac(&self, chaddr: &[u8; 16]) -> bool {
        &self.chaddr == chaddr
    }
}

/// Which kind of free address a pool scan should look for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum AddressPass {
    /// No lease at all for that IP.
    Fresh,
    /// A lease exists but has expired.
    Expired,
}

/// Bounded lease table. Capacity is a runtime configuration value (the
/// administrator's `max_leases`), so this is a plain `Vec`, not a
/// fixed-capacity container.
#[derive(Debug, Default)]
pub struct LeaseStore {
    leases: Vec<Lease>,
    /// IPs placed on hold after a DECLINE, with the time the hold expires.
    declined: Vec<(Ipv4Addr, SystemTime)>,
    capacity: usize,
}

impl LeaseStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            leases: Vec::new(),
            declined: Vec::new(),
            capacity,
        }
    }

    pub fn leases(&self) -> &[Lease] {
        &self.leases
    }

    pub fn find_by_chaddr(&self, chaddr: &[u8; 16]) -> Option<&Lease> {
        self.leases.iter().find(|l| l.matches_mac(chaddr))
    }

    pub fn find_by_yiaddr(&self, ip: Ipv4Addr) -> Option<&Lease> {
        self.leases.iter().find(|l| l.yiaddr == ip)
    }

    /// Overwrites any existing lease for `chaddr`, reusing an expired slot
    /// if the table is full of active leases. Fails only when every slot
    /// holds an unexpired lease for a *different* MAC.
    pub fn add_lease(
        &mut self,
        chaddr: [u8; 16],
        ip: Ipv4Addr,
        ttl: Duration,
        now: SystemTime,
    ) -> bool {
        self.leases.retain(|l| !l.matches_mac(&chaddr));

        let expires = now + ttl;

        if self.leases.len() < self.capacity {
            self.leases.push(Lease {
                chaddr,
                yiaddr: ip,
                expires,
            });
            return true;
        }

        if let Some(slot) = self.leases.iter_mut().find(|l| !l.is_active(now)) {
            slot.chaddr = chaddr;
            slot.yiaddr = ip;
            slot.expires = expires;
            return true;
        }

        warn!("lease table full ({} active leases)", self.capacity);
        false
    }

    pub fn clear_lease(&mut self, chaddr: &[u8; 16]) {
        self.leases.retain(|l| !l.matches_mac(chaddr));
    }

    pub fn decline(&mut self, ip: Ipv4Addr, hold: Duration, now: SystemTime) {
        self.declined.retain(|(addr, _)| *addr != ip);
        self.declined.push((ip, now + hold));
    }

    fn is_on_hold(&self, ip: Ipv4Addr, now: SystemTime) -> bool {
        self.declined.iter().any(|(addr, expiry)| *addr == ip && *expiry > now)
    }

    fn scan(&self, start: Ipv4Addr, end: Ipv4Addr, server_ip: Ipv4Addr, now: SystemTime, pass: AddressPass) -> Option<Ipv4Addr> {
        let (start, end) = (u32::from(start), u32::from(end));

        for raw in start..=end {
            let ip = Ipv4Addr::from(raw);
            if ip == server_ip || self.is_on_hold(ip, now) {
                continue;
            }

            match (self.find_by_yiaddr(ip), pass) {
                (None, AddressPass::Fresh) => return Some(ip),
                (Some(lease), AddressPass::Expired) if !lease.is_active(now) => return Some(ip),
                _ => continue,
            }
        }

        None
    }

    /// Finds an address to offer: a fresh (never leased) IP first, then an
    /// expired one as a fallback.
    pub fn find_address(&self, start: Ipv4Addr, end: Ipv4Addr, server_ip: Ipv4Addr, now: SystemTime) -> Option<Ipv4Addr> {
        self.scan(start, end, server_ip, now, AddressPass::Fresh)
            .or_else(|| self.scan(start, end, server_ip, now, AddressPass::Expired))
    }

    pub fn is_in_pool(start: Ipv4Addr, end: Ipv4Addr, ip: Ipv4Addr) -> bool {
        u32::from(start) <= u32::from(ip) && u32::from(ip) <= u32::from(end)
    }

    /// `true` if `ip` can be leased to `chaddr`: unowned, owned by this
    /// MAC already, or owned by someone else but expired.
    fn available_for(&self, ip: Ipv4Addr, chaddr: &[u8; 16], now: SystemTime) -> bool {
        match self.find_by_yiaddr(ip) {
            None => true,
            Some(lease) => lease.matches_mac(chaddr) || !lease.is_active(now),
        }
    }
}

/// Static per-server configuration (parsed from the config file).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub server_ip: Ipv4Addr,
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
    pub lease: Duration,
    pub min_lease: Duration,
    pub offer_time: Duration,
    pub decline_time: Duration,
    pub siaddr: Ipv4Addr,
    pub sname: Vec<u8>,
    pub boot_file: Vec<u8>,
    /// Raw `(code, value)` pairs sent on every reply, subject to the
    /// client's parameter request list.
    pub default_options: Vec<(u8, Vec<u8>)>,
}

impl ServerConfig {
    fn lease_secs(&self, requested: Option<u32>) -> u32 {
        let secs = requested.unwrap_or(self.lease.as_secs() as u32);
        let min = self.min_lease.as_secs() as u32;
        let max = self.lease.as_secs() as u32;

        secs.clamp(min, max)
    }

    fn build_options<'cfg>(
        &'cfg self,
        message_type: MessageType,
        lease_secs: Option<u32>,
        param_request: Option<&[u8]>,
    ) -> Vec<DhcpOption<'cfg>> {
        let mut opts = vec![
            DhcpOption::MessageType(message_type),
            DhcpOption::ServerIdentifier(self.server_ip),
        ];

        if let Some(secs) = lease_secs {
            opts.push(DhcpOption::IpAddressLeaseTime(secs));
        }

        for (code, data) in &self.default_options {
            if let Some(pr) = param_request {
                if !pr.contains(code) {
                    continue;
                }
            }
            opts.push(DhcpOption::Unrecognized(*code, data));
        }

        opts
    }
}

/// What a decoded client request is asking the server to do.
#[derive(Clone, Debug)]
pub enum Action {
    Discover { requested_ip: Option<Ipv4Addr> },
    Request {
        ciaddr: Option<Ipv4Addr>,
        requested_ip: Option<Ipv4Addr>,
        server_id: Option<Ipv4Addr>,
    },
    Decline(Ipv4Addr),
    Release(Ipv4Addr),
    Inform,
}

/// Classifies an inbound packet, or `None` if it is not something this
/// server should act on (a reply, or a message type it doesn't dispatch).
pub fn classify(request: &Packet<'_>) -> Option<Action> {
    if request.reply {
        return None;
    }

    match request.options.message_type()? {
        MessageType::Discover => Some(Action::Discover {
            requested_ip: request.options.requested_ip(),
        }),
        MessageType::Request => Some(Action::Request {
            ciaddr: (!request.ciaddr.is_unspecified()).then_some(request.ciaddr),
            requested_ip: request.options.requested_ip(),
            server_id: request.options.server_identifier(),
        }),
        MessageType::Decline => request.options.requested_ip().map(Action::Decline),
        MessageType::Release => {
            (!request.ciaddr.is_unspecified()).then_some(Action::Release(request.ciaddr))
        }
        MessageType::Inform => Some(Action::Inform),
        MessageType::Offer | MessageType::Ack | MessageType::Nak => None,
    }
}

/// Builds the reply (if any) for one inbound request, mutating the lease
/// store as a side effect. Returns `None` when the transaction calls for
/// silence (RELEASE, DECLINE, a REQUEST addressed to a different server).
pub fn handle_request<'cfg>(
    request: &Packet<'_>,
    cfg: &'cfg ServerConfig,
    store: &mut LeaseStore,
    now: SystemTime,
) -> Option<(Packet<'static>, Vec<DhcpOption<'cfg>>)> {
    let action = classify(request)?;
    let param_request = request.options.parameter_request_list();

    match action {
        Action::Discover { requested_ip } => {
            let yiaddr = store
                .find_by_chaddr(&request.chaddr)
                .filter(|l| l.is_active(now))
                .map(|l| l.yiaddr)
                .or_else(|| {
                    requested_ip.filter(|ip| {
                        LeaseStore::is_in_pool(cfg.pool_start, cfg.pool_end, *ip)
                            && store.available_for(*ip, &request.chaddr, now)
                    })
                })
                .or_else(|| store.find_address(cfg.pool_start, cfg.pool_end, cfg.server_ip, now));

            let Some(yiaddr) = yiaddr else {
                warn!("no addresses available to offer to {:02x?}", &request.chaddr[..6]);
                return None;
            };

            let requested_lease = request.options.lease_time();
            let lease_secs = cfg.lease_secs(requested_lease);

            store.add_lease(request.chaddr, yiaddr, cfg.offer_time, now);

            let options = cfg.build_options(MessageType::Offer, Some(lease_secs), param_request);
            let reply = reply_packet(request, cfg, yiaddr);

            Some((reply, options))
        }

        Action::Request {
            ciaddr,
            requested_ip,
            server_id,
        } => {
            let accept = if let Some(server_id) = server_id {
                // Selecting: this REQUEST answers someone's OFFER.
                if server_id != cfg.server_ip {
                    return None;
                }
                requested_ip.filter(|ip| {
                    LeaseStore::is_in_pool(cfg.pool_start, cfg.pool_end, *ip)
                        && store.available_for(*ip, &request.chaddr, now)
                })
            } else if let Some(ip) = requested_ip {
                // Init-reboot: client remembers a lease, no server chosen yet.
                (LeaseStore::is_in_pool(cfg.pool_start, cfg.pool_end, ip)
                    && store.available_for(ip, &request.chaddr, now))
                .then_some(ip)
            } else if let Some(ip) = ciaddr {
                // Renewing or rebinding.
                (LeaseStore::is_in_pool(cfg.pool_start, cfg.pool_end, ip)
                    && store.available_for(ip, &request.chaddr, now))
                .then_some(ip)
            } else {
                None
            };

            let lease_secs = cfg.lease_secs(request.options.lease_time());

            let (yiaddr, lease_secs) = match accept {
                Some(ip) => {
                    store.add_lease(request.chaddr, ip, Duration::from_secs(lease_secs as u64), now);
                    (Some(ip), Some(lease_secs))
                }
                None => {
                    debug!("NAK for {:02x?}", &request.chaddr[..6]);
                    (None, None)
                }
            };

            let message_type = if yiaddr.is_some() {
                MessageType::Ack
            } else {
                MessageType::Nak
            };

            let options = cfg.build_options(message_type, lease_secs, param_request);
            let reply = reply_packet(request, cfg, yiaddr.unwrap_or(Ipv4Addr::UNSPECIFIED));

            Some((reply, options))
        }

        Action::Decline(ip) => {
            store.clear_lease(&request.chaddr);
            store.decline(ip, cfg.decline_time, now);
            None
        }

        Action::Release(ip) => {
            if store.find_by_yiaddr(ip).is_some() {
                store.clear_lease(&request.chaddr);
            }
            None
        }

        Action::Inform => {
            let options = cfg.build_options(MessageType::Ack, None, param_request);
            let reply = reply_packet(request, cfg, Ipv4Addr::UNSPECIFIED);

            Some((reply, options))
        }
    }
}

fn reply_packet(request: &Packet<'_>, cfg: &ServerConfig, yiaddr: Ipv4Addr) -> Packet<'static> {
    let mut reply = Packet::new_reply(request, yiaddr);
    reply.siaddr = cfg.siaddr;
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg() -> ServerConfig {
        ServerConfig {
            server_ip: Ipv4Addr::new(192, 168, 1, 1),
            pool_start: Ipv4Addr::new(192, 168, 1, 100),
            pool_end: Ipv4Addr::new(192, 168, 1, 200),
            lease: Duration::from_secs(3600),
            min_lease: Duration::from_secs(60),
            offer_time: Duration::from_secs(60),
            decline_time: Duration::from_secs(3600),
            siaddr: Ipv4Addr::UNSPECIFIED,
            sname: Vec::new(),
            boot_file: Vec::new(),
            default_options: Vec::new(),
        }
    }

    #[test]
    fn offers_first_free_address() {
        let cfg = cfg();
        let mut store = LeaseStore::new(100);
        let now = SystemTime::now();

        let ip = store
            .find_address(cfg.pool_start, cfg.pool_end, cfg.server_ip, now)
            .unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 100));
    }

    #[test]
    fn reoffers_same_address_to_existing_lease() {
        let cfg = cfg();
        let mut store = LeaseStore::new(100);
        let now = SystemTime::now();
        let mac = {
            let mut m = [0u8; 16];
            m[..6].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
            m
        };

        assert!(store.add_lease(mac, Ipv4Addr::new(192, 168, 1, 150), cfg.lease, now));
        assert_eq!(
            store.find_by_chaddr(&mac).unwrap().yiaddr,
            Ipv4Addr::new(192, 168, 1, 150)
        );
    }

    #[test]
    fn pool_exhaustion_refuses_new_lease() {
        let mut store = LeaseStore::new(1);
        let now = SystemTime::now();
        let mac_a = {
            let mut m = [0u8; 16];
            m[0] = 1;
            m
        };
        let mac_b = {
            let mut m = [0u8; 16];
            m[0] = 2;
            m
        };

        assert!(store.add_lease(mac_a, Ipv4Addr::new(10, 0, 0, 1), Duration::from_secs(3600), now));
        assert!(!store.add_lease(mac_b, Ipv4Addr::new(10, 0, 0, 2), Duration::from_secs(3600), now));
    }

    #[test]
    fn expired_lease_is_reclaimed() {
        let mut store = LeaseStore::new(1);
        let past = SystemTime::now() - Duration::from_secs(10);
        let mac_a = {
            let mut m = [0u8; 16];
            m[0] = 1;
            m
        };
        let mac_b = {
            let mut m = [0u8; 16];
            m[0] = 2;
            m
        };

        assert!(store.add_lease(mac_a, Ipv4Addr::new(10, 0, 0, 1), Duration::from_secs(1), past));
        let now = SystemTime::now();
        assert!(store.add_lease(mac_b, Ipv4Addr::new(10, 0, 0, 2), Duration::from_secs(3600), now));
    }

    #[test]
    fn declined_address_is_held_back() {
        let cfg = cfg();
        let mut store = LeaseStore::new(100);
        let now = SystemTime::now();

        let first = store
            .find_address(cfg.pool_start, cfg.pool_end, cfg.server_ip, now)
            .unwrap();
        store.decline(first, Duration::from_secs(60), now);

        let second = store
            .find_address(cfg.pool_start, cfg.pool_end, cfg.server_ip, now)
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn classify_ignores_replies() {
        let req = Packet::new_request(1, 0, [1, 2, 3, 4, 5, 6], true);
        let opts = [DhcpOption::MessageType(MessageType::Discover)];
        let mut buf = [0u8; 576];
        let encoded = req.encode(&mut buf, &opts).unwrap();
        let mut decoded = Packet::decode(encoded).unwrap();
        assert!(classify(&decoded).is_some());

        decoded.reply = true;
        assert!(classify(&decoded).is_none());
    }

    #[test]
    fn discover_yields_an_offer() {
        let cfg = cfg();
        let mut store = LeaseStore::new(100);
        let now = SystemTime::now();

        let req = Packet::new_request(42, 0, [1, 2, 3, 4, 5, 6], true);
        let opts = [DhcpOption::MessageType(MessageType::Discover)];
        let mut buf = [0u8; 576];
        let encoded = req.encode(&mut buf, &opts).unwrap();
        let decoded = Packet::decode(encoded).unwrap();

        let (reply, reply_opts) = handle_request(&decoded, &cfg, &mut store, now).unwrap();
        assert_eq!(reply.yiaddr, Ipv4Addr::new(192, 168, 1, 100));
        assert!(reply_opts
            .iter()
            .any(|o| matches!(o, DhcpOption::MessageType(MessageType::Offer))));
    }
}
