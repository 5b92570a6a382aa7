//! The server's line-based configuration file. The grammar predates (and
//! does not match) any common structured format, so it is parsed by hand:
//! `# comment` lines, blank lines, and `key value...` lines, case
//! insensitive on the key.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use dhcp_proto::options::code;
use dhcp_proto::server::ServerConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub interface: String,
    pub server: ServerConfig,
    pub max_leases: usize,
    pub auto_time: Duration,
    pub conflict_time: Duration,
    pub lease_file: Option<PathBuf>,
    pub pid_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "eth0".into(),
            server: ServerConfig {
                server_ip: Ipv4Addr::UNSPECIFIED,
                pool_start: Ipv4Addr::UNSPECIFIED,
                pool_end: Ipv4Addr::UNSPECIFIED,
                lease: Duration::from_secs(60 * 60 * 24 * 10),
                min_lease: Duration::from_secs(60),
                offer_time: Duration::from_secs(60),
                decline_time: Duration::from_secs(60 * 60),
                siaddr: Ipv4Addr::UNSPECIFIED,
                sname: Vec::new(),
                boot_file: Vec::new(),
                default_options: Vec::new(),
            },
            max_leases: 254,
            auto_time: Duration::from_secs(0),
            conflict_time: Duration::from_secs(60 * 60 * 2),
            lease_file: None,
            pid_file: PathBuf::from("/var/run/dhcpd.pid"),
        }
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;

        let mut cfg = Self::default();
        let mut pool_start = None;
        let mut pool_end = None;

        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let mut words = line.split_whitespace();
            let key = words.next().unwrap().to_ascii_lowercase();
            let rest: Vec<&str> = words.collect();

            apply_directive(&mut cfg, &mut pool_start, &mut pool_end, &key, &rest)
                .with_context(|| format!("{}:{}: {}", path.display(), lineno + 1, raw_line))?;
        }

        cfg.server.pool_start = pool_start.context("missing `start` directive")?;
        cfg.server.pool_end = pool_end.context("missing `end` directive")?;

        if cfg.server.server_ip.is_unspecified() {
            bail!("missing `option server` (or `server`) directive");
        }

        Ok(cfg)
    }
}

fn apply_directive(
    cfg: &mut Config,
    pool_start: &mut Option<Ipv4Addr>,
    pool_end: &mut Option<Ipv4Addr>,
    key: &str,
    rest: &[&str],
) -> anyhow::Result<()> {
    let first = || rest.first().copied().context("missing value");
    let ipv4 = |s: &str| s.parse::<Ipv4Addr>().with_context(|| format!("not an IPv4 address: {s}"));
    let secs = |s: &str| -> anyhow::Result<Duration> {
        Ok(Duration::from_secs(s.parse::<u64>().with_context(|| format!("not a number: {s}"))?))
    };

    match key {
        "start" => *pool_start = Some(ipv4(first()?)?),
        "end" => *pool_end = Some(ipv4(first()?)?),
        "interface" => cfg.interface = first()?.to_string(),
        "max_leases" => cfg.max_leases = first()?.parse().context("not a number")?,
        "auto_time" => cfg.auto_time = secs(first()?)?,
        "decline_time" => cfg.server.decline_time = secs(first()?)?,
        "conflict_time" => cfg.conflict_time = secs(first()?)?,
        "offer_time" => cfg.server.offer_time = secs(first()?)?,
        "min_lease" => cfg.server.min_lease = secs(first()?)?,
        "lease_time" | "lease" => cfg.server.lease = secs(first()?)?,
        "lease_file" => cfg.lease_file = Some(PathBuf::from(first()?)),
        "pidfile" => cfg.pid_file = PathBuf::from(first()?),
        "siaddr" => cfg.server.siaddr = ipv4(first()?)?,
        "sname" => cfg.server.sname = first()?.as_bytes().to_vec(),
        "boot_file" => cfg.server.boot_file = first()?.as_bytes().to_vec(),
        "notify_file" | "remaining" => {
            // accepted for compatibility with the legacy config format; not
            // modeled by this implementation
        }
        "option" | "opt" => apply_option(cfg, rest)?,
        other => bail!("unrecognized directive `{other}`"),
    }

    Ok(())
}

fn apply_option(cfg: &mut Config, rest: &[&str]) -> anyhow::Result<()> {
    let [name, values @ ..] = rest else {
        bail!("`option` requires a name and at least one value");
    };

    match name.to_ascii_lowercase().as_str() {
        "server" | "server_id" => {
            cfg.server.server_ip = values
                .first()
                .context("`option server` requires a value")?
                .parse()?;
        }
        "subnet" => insert_ipv4(cfg, code::SUBNET_MASK, values)?,
        "router" | "routers" => insert_ipv4_list(cfg, code::ROUTER, values)?,
        "dns" => insert_ipv4_list(cfg, code::DOMAIN_NAME_SERVER, values)?,
        "domain" => insert_string(cfg, code::DOMAIN_NAME, values)?,
        "broadcast" => insert_ipv4(cfg, code::BROADCAST_ADDRESS, values)?,
        other => bail!("unrecognized option `{other}`"),
    }

    Ok(())
}

fn set_default_option(cfg: &mut Config, code: u8, data: Vec<u8>) {
    cfg.server.default_options.retain(|(c, _)| *c != code);
    cfg.server.default_options.push((code, data));
}

fn insert_ipv4(cfg: &mut Config, code: u8, values: &[&str]) -> anyhow::Result<()> {
    let ip: Ipv4Addr = values.first().context("missing value")?.parse()?;
    set_default_option(cfg, code, ip.octets().to_vec());
    Ok(())
}

fn insert_ipv4_list(cfg: &mut Config, code: u8, values: &[&str]) -> anyhow::Result<()> {
    let mut data = Vec::with_capacity(values.len() * 4);
    for v in values {
        let ip: Ipv4Addr = v.parse()?;
        data.extend_from_slice(&ip.octets());
    }
    if data.is_empty() {
        bail!("missing value");
    }
    set_default_option(cfg, code, data);
    Ok(())
}

fn insert_string(cfg: &mut Config, code: u8, values: &[&str]) -> anyhow::Result<()> {
    let joined = values.join(" ");
    if joined.is_empty() {
        bail!("missing value");
    }
    set_default_option(cfg, code, joined.into_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_a_minimal_config() {
        let mut file = tempfile();
        writeln!(
            file,
            "# example\nstart 192.168.1.100\nend 192.168.1.200\noption server 192.168.1.1\noption subnet 255.255.255.0\ninterface eth1\n"
        )
        .unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.server.pool_start, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(cfg.server.pool_end, Ipv4Addr::new(192, 168, 1, 200));
        assert_eq!(cfg.server.server_ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(cfg.interface, "eth1");
        assert_eq!(
            cfg.server
                .default_options
                .iter()
                .find(|(c, _)| *c == code::SUBNET_MASK)
                .map(|(_, d)| d.clone()),
            Some(vec![255, 255, 255, 0])
        );
    }

    #[test]
    fn rejects_missing_pool_bounds() {
        let mut file = tempfile();
        writeln!(file, "option server 192.168.1.1\n").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    fn tempfile() -> tempfile_shim::NamedTempFile {
        tempfile_shim::NamedTempFile::new()
    }

    /// A tiny stand-in for a temp-file crate: this repo otherwise has no
    /// need for one, and the test only needs a throwaway path.
    mod tempfile_shim {
        use std::fs::File;
        use std::path::{Path, PathBuf};

        pub struct NamedTempFile {
            path: PathBuf,
            file: File,
        }

        impl NamedTempFile {
            pub fn new() -> Self {
                let path = std::env::temp_dir().join(format!(
                    "dhcpd-config-test-{}-{}",
                    std::process::id(),
                    std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap()
                        .as_nanos()
                ));
                let file = File::create(&path).unwrap();
                Self { path, file }
            }

            pub fn path(&self) -> &Path {
                &self.path
            }
        }

        impl std::io::Write for NamedTempFile {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.file.write(buf)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                self.file.flush()
            }
        }

        impl Drop for NamedTempFile {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}
