use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

/// A minimal DHCP client.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Interface to configure.
    #[arg(short, long, default_value = "eth0")]
    pub interface: String,

    /// Client identifier to send (option 61); defaults to the MAC address.
    #[arg(short, long)]
    pub clientid: Option<String>,

    /// Hostname to send (option 12).
    #[arg(short = 'H', long)]
    pub hostname: Option<String>,

    /// Stay in the foreground instead of daemonizing once bound.
    #[arg(short, long)]
    pub foreground: bool,

    /// Exit with an error if a lease can't be obtained on the first attempt.
    #[arg(short, long)]
    pub now: bool,

    /// Path to write the PID file.
    #[arg(short, long, default_value = "/var/run/dhcpc.pid")]
    pub pidfile: PathBuf,

    /// Exit as soon as a lease is obtained instead of staying resident to renew it.
    #[arg(short, long)]
    pub quit: bool,

    /// Request this specific address (init-reboot) instead of discovering one.
    #[arg(short, long)]
    pub request: Option<Ipv4Addr>,

    /// Script invoked on bound/renew/deconfig transitions.
    #[arg(short, long)]
    pub script: Option<PathBuf>,
}
