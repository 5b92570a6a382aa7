use std::path::PathBuf;

use clap::Parser;

/// A minimal DHCP server.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Path to the server configuration file.
    #[arg(default_value = "/etc/dhcpd.conf")]
    pub config: PathBuf,

    /// Stay in the foreground instead of daemonizing.
    #[arg(short, long)]
    pub foreground: bool,
}
