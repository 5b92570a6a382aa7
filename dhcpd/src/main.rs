mod cli;
mod config;
mod leasefile;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_io::Timer;
use clap::Parser;
use dhcp_net::{LinkSocket, LinkTransport, UdpSocket, UdpTransport};
use dhcp_proto::server::{handle_request, LeaseStore, ServerConfig};
use dhcp_proto::{DhcpOption, MessageType, Packet};
use futures_lite::future::{block_on, or};
use log::{info, warn};

use cli::Cli;
use config::Config;

const SERVER_PORT: u16 = 67;
const CLIENT_PORT: u16 = 68;
const BROADCAST_MAC: [u8; 6] = [0xff; 6];

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    if !cli.foreground {
        dhcp_glue::daemonize().context("daemonizing")?;
    }
    let _pidfile = dhcp_glue::PidFile::create(&cfg.pid_file).context("creating pidfile")?;

    let ifindex = dhcp_net::iface::index_of(&cfg.interface)
        .with_context(|| format!("resolving interface {}", cfg.interface))?;
    let raw = LinkSocket::bind(ifindex).context("opening raw socket")?;
    let udp = UdpSocket::bind(&cfg.interface, SERVER_PORT).context("opening udp socket")?;

    let mut store = match &cfg.lease_file {
        Some(path) => leasefile::load(path, cfg.max_leases).context("loading lease file")?,
        None => LeaseStore::new(cfg.max_leases),
    };

    let terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, terminate.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, terminate.clone())?;

    info!(
        "dhcpd listening on {} ({}..{})",
        cfg.interface, cfg.server.pool_start, cfg.server.pool_end
    );

    block_on(run(&cfg, &raw, &udp, &mut store, &terminate))?;

    if let Some(path) = &cfg.lease_file {
        leasefile::save(&store, path).context("saving lease file")?;
    }

    info!("dhcpd exiting");
    Ok(())
}

enum Event {
    Packet(Result<usize, dhcp_net::raw::RawIoError>),
    Tick,
}

async fn run(
    cfg: &Config,
    raw: &LinkSocket,
    udp: &UdpSocket,
    store: &mut LeaseStore,
    terminate: &AtomicBool,
) -> anyhow::Result<()> {
    let mut buf = [0u8; 1500];
    let mut last_snapshot = Instant::now();

    let snapshot_period = if cfg.auto_time.is_zero() {
        None
    } else {
        Some(cfg.auto_time)
    };

    while !terminate.load(Ordering::Relaxed) {
        let poll_period = snapshot_period.unwrap_or(Duration::from_secs(30));

        let event = or(
            async { Event::Packet(raw.recv_raw(&mut buf).await) },
            async {
                Timer::after(poll_period).await;
                Event::Tick
            },
        )
        .await;

        match event {
            Event::Packet(Ok(len)) => {
                if let Err(e) = handle_one(cfg, raw, udp, store, &buf[..len]) {
                    warn!("failed to handle packet: {e}");
                }
            }
            Event::Packet(Err(e)) => warn!("raw socket read failed: {e}"),
            Event::Tick => {}
        }

        if let (Some(period), Some(path)) = (snapshot_period, &cfg.lease_file) {
            if last_snapshot.elapsed() >= period {
                leasefile::save(store, path).context("saving lease file")?;
                last_snapshot = Instant::now();
            }
        }
    }

    Ok(())
}

fn handle_one(
    cfg: &Config,
    raw: &LinkSocket,
    udp: &UdpSocket,
    store: &mut LeaseStore,
    frame: &[u8],
) -> anyhow::Result<()> {
    let Some((_src, _dst, request)) = Packet::decode_raw(frame, None, Some(SERVER_PORT))? else {
        return Ok(());
    };

    let now = std::time::SystemTime::now();
    let Some((reply, options)) = handle_request(&request, &cfg.server, store, now) else {
        return Ok(());
    };

    send_reply(cfg, raw, udp, &request, &reply, &options)
}

fn send_reply(
    cfg: &Config,
    raw: &LinkSocket,
    udp: &UdpSocket,
    request: &Packet<'_>,
    reply: &Packet<'_>,
    options: &[DhcpOption<'_>],
) -> anyhow::Result<()> {
    let is_nak = options
        .iter()
        .any(|o| matches!(o, DhcpOption::MessageType(MessageType::Nak)));

    let mut mac = [0u8; 6];
    mac.copy_from_slice(&request.chaddr[..6]);

    let mut buf = [0u8; 1500];

    if !request.giaddr.is_unspecified() {
        let mut payload = [0u8; 1500];
        let len = reply.encode(&mut payload, options)?.len();
        block_on(udp.send_to(SocketAddrV4::new(request.giaddr, SERVER_PORT), &payload[..len]))?;
        return Ok(());
    }

    let (dst_ip, dst_mac) = if !request.ciaddr.is_unspecified() {
        (request.ciaddr, mac)
    } else if !is_nak && !request.broadcast && !reply.yiaddr.is_unspecified() {
        (reply.yiaddr, mac)
    } else {
        (Ipv4Addr::BROADCAST, BROADCAST_MAC)
    };

    let frame = reply.encode_raw(
        SocketAddrV4::new(cfg.server.server_ip, SERVER_PORT),
        SocketAddrV4::new(dst_ip, CLIENT_PORT),
        options,
        &mut buf,
    )?;

    block_on(raw.send_raw(dst_mac, frame))?;

    Ok(())
}
