//! Binary lease-file snapshot: a sequence of fixed-size records
//! `(chaddr[16], yiaddr:u32, expires:u32)` in network byte order, written
//! periodically and reloaded at startup.

use std::io;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dhcp_proto::server::LeaseStore;
use log::warn;

const RECORD_LEN: usize = 16 + 4 + 4;

pub fn save(store: &LeaseStore, path: &Path) -> io::Result<()> {
    let mut buf = Vec::with_capacity(store.leases().len() * RECORD_LEN);

    for lease in store.leases() {
        let expires = lease
            .expires
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs() as u32;

        buf.extend_from_slice(&lease.chaddr);
        buf.extend_from_slice(&u32::from(lease.yiaddr).to_be_bytes());
        buf.extend_from_slice(&expires.to_be_bytes());
    }

    std::fs::write(path, buf)
}

/// Loads a previously saved snapshot into a fresh store, discarding any
/// record that has already expired.
pub fn load(path: &Path, capacity: usize) -> io::Result<LeaseStore> {
    let mut store = LeaseStore::new(capacity);

    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(store),
        Err(e) => return Err(e),
    };

    if data.len() % RECORD_LEN != 0 {
        warn!(
            "{} has a size that is not a multiple of the record length; ignoring trailing bytes",
            path.display()
        );
    }

    let now = SystemTime::now();

    for record in data.chunks_exact(RECORD_LEN) {
        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&record[..16]);

        let yiaddr = Ipv4Addr::from(u32::from_be_bytes(record[16..20].try_into().unwrap()));
        let expires_secs = u32::from_be_bytes(record[20..24].try_into().unwrap());
        let expires = UNIX_EPOCH + Duration::from_secs(expires_secs as u64);

        if expires <= now {
            continue;
        }

        let ttl = expires.duration_since(now).unwrap_or(Duration::ZERO);
        store.add_lease(chaddr, yiaddr, ttl, now);
    }

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_active_lease() {
        let mut store = LeaseStore::new(10);
        let now = SystemTime::now();
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);

        store.add_lease(chaddr, Ipv4Addr::new(10, 0, 0, 5), Duration::from_secs(3600), now);

        let path = std::env::temp_dir().join(format!("dhcpd-leasefile-test-{}", std::process::id()));
        save(&store, &path).unwrap();

        let reloaded = load(&path, 10).unwrap();
        assert_eq!(
            reloaded.find_by_chaddr(&chaddr).unwrap().yiaddr,
            Ipv4Addr::new(10, 0, 0, 5)
        );

        std::fs::remove_file(&path).unwrap();
    }
}
