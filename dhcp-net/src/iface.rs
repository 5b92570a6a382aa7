//! Interface introspection: index and hardware address lookup by name.
//! Kept separate from socket setup since both the raw and cooked paths
//! need it and it carries no protocol logic of its own.

use std::io;

use nix::net::if_::if_nametoindex;

/// Resolves an interface name (e.g. `"eth0"`) to its kernel ifindex, as
/// needed to bind an `AF_PACKET` socket.
pub fn index_of(name: &str) -> io::Result<u32> {
    if_nametoindex(name).map_err(|e| io::Error::from_raw_os_error(e as i32))
}

/// Resolves an interface name to its hardware (MAC) address.
pub fn mac_of(name: &str) -> io::Result<[u8; 6]> {
    let mac = mac_address::mac_address_by_name(name)
        .map_err(|e| io::Error::other(e.to_string()))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such interface: {name}")))?;

    Ok(mac.bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_resolves() {
        // `lo` exists on every Linux host this runs on, including CI sandboxes.
        assert!(index_of("lo").is_ok());
    }
}
