mod cli;
mod signals;
mod state;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use async_io::Timer;
use clap::Parser;
use dhcp_net::{iface, LinkSocket, LinkTransport, UdpSocket, UdpTransport};
use dhcp_proto::client::{self, Identity, Settings};
use dhcp_proto::Packet;
use futures_lite::future::{block_on, or};
use log::{debug, info, warn};

use cli::Cli;
use signals::Signals;
use state::{ListenerMode, RetrySchedule, State};

const SERVER_PORT: u16 = 67;
const CLIENT_PORT: u16 = 68;
const BROADCAST_MAC: [u8; 6] = [0xff; 6];
const DEFAULT_LEASE: Duration = Duration::from_secs(3600);

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    let cli = Cli::parse();
    let mac = iface::mac_of(&cli.interface).with_context(|| format!("reading MAC of {}", cli.interface))?;
    let ifindex = iface::index_of(&cli.interface).with_context(|| format!("resolving interface {}", cli.interface))?;
    let signals = Signals::register().context("registering signal handlers")?;

    block_on(run(&cli, mac, ifindex, &signals))
}

enum RawEvent {
    Packet(usize),
    Timeout,
    Signaled,
}

async fn wait_raw(raw: &LinkSocket, buf: &mut [u8], timeout: Duration, signals: &Signals) -> RawEvent {
    const POLL: Duration = Duration::from_secs(1);
    let deadline = Instant::now() + timeout;

    loop {
        if signals.pending() {
            return RawEvent::Signaled;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return RawEvent::Timeout;
        }

        let slice = remaining.min(POLL);
        let outcome = or(
            async { Some(raw.recv_raw(buf).await) },
            async {
                Timer::after(slice).await;
                None
            },
        )
        .await;

        match outcome {
            Some(Ok(len)) => return RawEvent::Packet(len),
            Some(Err(e)) => debug!("raw recv failed: {e}"),
            None => {}
        }
    }
}

enum UdpEvent {
    Packet(usize),
    Timeout,
    Signaled,
}

async fn wait_udp(udp: &UdpSocket, buf: &mut [u8], timeout: Duration, signals: &Signals) -> UdpEvent {
    const POLL: Duration = Duration::from_secs(1);
    let deadline = Instant::now() + timeout;

    loop {
        if signals.pending() {
            return UdpEvent::Signaled;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return UdpEvent::Timeout;
        }

        let slice = remaining.min(POLL);
        let outcome = or(
            async { Some(udp.recv_from(buf).await) },
            async {
                Timer::after(slice).await;
                None
            },
        )
        .await;

        match outcome {
            Some(Ok((len, _from))) => return UdpEvent::Packet(len),
            Some(Err(e)) => debug!("udp recv failed: {e}"),
            None => {}
        }
    }
}

/// Sleeps until `deadline`, waking early (`true`) the moment a signal flag
/// is set so the caller can act on it without waiting out the full sleep.
async fn sleep_until_signal(deadline: Instant, signals: &Signals) -> bool {
    const POLL: Duration = Duration::from_secs(1);
    loop {
        if signals.pending() {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        Timer::after(remaining.min(POLL)).await;
    }
}

struct Listeners {
    raw: Option<LinkSocket>,
    udp: Option<UdpSocket>,
    mode: ListenerMode,
}

impl Listeners {
    fn new() -> Self {
        Self { raw: None, udp: None, mode: ListenerMode::None }
    }

    fn ensure(&mut self, mode: ListenerMode, ifindex: u32, interface: &str) -> anyhow::Result<()> {
        let already_open = match mode {
            ListenerMode::Raw => self.raw.is_some(),
            ListenerMode::Kernel => self.udp.is_some(),
            ListenerMode::None => true,
        };
        if self.mode == mode && already_open {
            return Ok(());
        }

        self.raw = None;
        self.udp = None;
        match mode {
            ListenerMode::Raw => self.raw = Some(LinkSocket::bind(ifindex).context("opening raw socket")?),
            ListenerMode::Kernel => {
                self.udp = Some(UdpSocket::bind(interface, CLIENT_PORT).context("opening udp socket")?)
            }
            ListenerMode::None => {}
        }
        self.mode = mode;
        Ok(())
    }

    fn force_kernel(&mut self, interface: &str) -> anyhow::Result<&UdpSocket> {
        if self.udp.is_none() {
            self.udp = Some(UdpSocket::bind(interface, CLIENT_PORT).context("opening udp socket")?);
        }
        Ok(self.udp.as_ref().unwrap())
    }
}

fn settings_vars(s: &Settings) -> Vec<(&'static str, String)> {
    let mut vars = vec![("ip", s.ip.to_string()), ("lease", s.lease.as_secs().to_string())];
    if let Some(v) = s.subnet {
        vars.push(("subnet", v.to_string()));
    }
    if !s.routers.is_empty() {
        vars.push(("router", s.routers.iter().map(Ipv4Addr::to_string).collect::<Vec<_>>().join(" ")));
    }
    if !s.dns.is_empty() {
        vars.push(("dns", s.dns.iter().map(Ipv4Addr::to_string).collect::<Vec<_>>().join(" ")));
    }
    if let Some(ref v) = s.domain {
        vars.push(("domain", v.clone()));
    }
    if let Some(v) = s.broadcast {
        vars.push(("broadcast", v.to_string()));
    }
    if let Some(ref v) = s.hostname {
        vars.push(("hostname", v.clone()));
    }
    vars
}

fn run_script(cli: &Cli, event: &str, settings: Option<&Settings>) {
    let Some(script) = &cli.script else { return };
    let vars = settings.map(settings_vars).unwrap_or_default();
    if let Err(e) = dhcp_glue::run_hook(script, event, &cli.interface, &vars) {
        warn!("{event} script hook failed: {e}");
    }
}

async fn run(cli: &Cli, mac: [u8; 6], ifindex: u32, signals: &Signals) -> anyhow::Result<()> {
    let client_id = cli.clientid.as_ref().map(|s| s.clone().into_bytes());
    let hostname = cli.hostname.clone();
    let identity = Identity {
        mac,
        client_id: client_id.as_deref(),
        hostname: hostname.as_deref(),
        params: client::DEFAULT_PARAMS,
    };

    let mut xid = rand::random::<u32>();
    let mut state = if cli.request.is_some() { State::Requesting } else { State::InitSelecting };
    let mut offered_ip: Option<Ipv4Addr> = None;
    let mut server_id: Option<Ipv4Addr> = None;
    let mut settings: Option<Settings> = None;
    let mut bound_at = Instant::now();
    let mut schedule = RetrySchedule::new();
    let mut listeners = Listeners::new();
    let mut pidfile: Option<dhcp_glue::PidFile> = None;

    loop {
        if signals.terminated() {
            info!("terminating");
            return Ok(());
        }

        if signals.take_release() {
            if matches!(state, State::Bound | State::Renewing | State::Rebinding | State::RenewRequested) {
                if let Some(s) = settings.clone() {
                    let server = s.server_id.unwrap_or(s.ip);
                    let (packet, opts) = client::release(xid, &identity, s.ip, server);
                    let udp = listeners.force_kernel(&cli.interface)?;
                    let mut buf = [0u8; 576];
                    if let Ok(encoded) = packet.encode(&mut buf, &opts) {
                        let _ = udp.send_to(SocketAddrV4::new(server, SERVER_PORT), encoded).await;
                    }
                    run_script(cli, "deconfig", Some(&s));
                }
                settings = None;
                state = State::Released;
            }
        }

        if signals.take_renew() {
            state = match state {
                State::Released => State::InitSelecting,
                State::Bound | State::Renewing | State::Rebinding => State::RenewRequested,
                other => other,
            };
            xid = rand::random();
            schedule.reset();
        }

        listeners.ensure(state.listener_mode(), ifindex, &cli.interface)?;

        match state {
            State::InitSelecting => {
                let attempt = schedule.attempt();
                match schedule.interval() {
                    Some(interval) => {
                        let requested_ip = cli.request.or(offered_ip);
                        let (packet, opts) = client::discover(xid, 0, &identity, requested_ip);
                        let mut buf = [0u8; 576];
                        let raw = listeners.raw.as_ref().expect("raw socket open in InitSelecting");
                        let frame = packet.encode_raw(
                            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, CLIENT_PORT),
                            SocketAddrV4::new(Ipv4Addr::BROADCAST, SERVER_PORT),
                            &opts,
                            &mut buf,
                        )?;
                        raw.send_raw(BROADCAST_MAC, frame).await?;
                        debug!("sent DISCOVER xid={xid:#x} attempt={attempt}");

                        let mut recv_buf = [0u8; 1500];
                        if let RawEvent::Packet(len) = wait_raw(raw, &mut recv_buf, interval, signals).await {
                            if let Ok(Some((_, _, reply))) =
                                Packet::decode_raw(&recv_buf[..len], None, Some(CLIENT_PORT))
                            {
                                if client::is_offer(&reply, xid, mac) {
                                    offered_ip = Some(reply.yiaddr);
                                    server_id = reply.options.server_identifier();
                                    schedule.reset();
                                    state = State::Requesting;
                                }
                            }
                        }
                    }
                    None => {
                        if cli.now {
                            bail!("no lease obtained after initial retry schedule");
                        }
                        Timer::after(state::RETRY_COOLDOWN).await;
                        xid = rand::random();
                        schedule.reset();
                    }
                }
            }

            State::Requesting => {
                let attempt = schedule.attempt();
                match schedule.interval() {
                    Some(interval) => {
                        let (packet, opts) = match (cli.request, offered_ip, server_id) {
                            (Some(ip), None, _) => client::request_init_reboot(xid, 0, &identity, ip),
                            (_, Some(ip), Some(sid)) => client::request_selecting(xid, 0, &identity, sid, ip),
                            _ => {
                                state = State::InitSelecting;
                                schedule.reset();
                                continue;
                            }
                        };
                        let mut buf = [0u8; 576];
                        let raw = listeners.raw.as_ref().expect("raw socket open in Requesting");
                        let frame = packet.encode_raw(
                            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, CLIENT_PORT),
                            SocketAddrV4::new(Ipv4Addr::BROADCAST, SERVER_PORT),
                            &opts,
                            &mut buf,
                        )?;
                        raw.send_raw(BROADCAST_MAC, frame).await?;
                        debug!("sent REQUEST xid={xid:#x} attempt={attempt}");

                        let mut recv_buf = [0u8; 1500];
                        if let RawEvent::Packet(len) = wait_raw(raw, &mut recv_buf, interval, signals).await {
                            if let Ok(Some((_, _, reply))) =
                                Packet::decode_raw(&recv_buf[..len], None, Some(CLIENT_PORT))
                            {
                                if client::is_ack(&reply, xid, mac) {
                                    let new_settings = Settings::from_ack(&reply, DEFAULT_LEASE);
                                    on_bound(cli, new_settings, &mut settings, &mut bound_at, &mut pidfile)?;
                                    if cli.quit {
                                        return Ok(());
                                    }
                                } else if client::is_nak(&reply, xid, mac) {
                                    offered_ip = None;
                                    server_id = None;
                                    state = State::InitSelecting;
                                    xid = rand::random();
                                    schedule.reset();
                                }
                            }
                        }
                    }
                    None => {
                        offered_ip = None;
                        server_id = None;
                        state = State::InitSelecting;
                        if cli.now && cli.request.is_none() {
                            bail!("no lease obtained after initial retry schedule");
                        }
                        Timer::after(state::RETRY_COOLDOWN).await;
                        xid = rand::random();
                        schedule.reset();
                    }
                }
            }

            State::Bound => {
                let s = settings.clone().expect("settings present while Bound");
                let deadline = bound_at + state::t1(s.lease);
                if !sleep_until_signal(deadline, signals).await {
                    state = State::Renewing;
                    xid = rand::random();
                }
            }

            State::Renewing | State::RenewRequested => {
                let s = settings.clone().expect("settings present while renewing");
                let server = s.server_id.unwrap_or(s.ip);
                let (packet, opts) = client::request_renew(xid, 0, &identity, s.ip, false);
                let mut buf = [0u8; 576];
                let encoded = packet.encode(&mut buf, &opts)?;
                let udp = listeners.udp.as_ref().expect("udp socket open while renewing");
                udp.send_to(SocketAddrV4::new(server, SERVER_PORT), encoded).await?;
                debug!("sent renew REQUEST xid={xid:#x}");

                let t2_deadline = bound_at + state::t2(s.lease);
                let remaining = t2_deadline.saturating_duration_since(Instant::now());
                let wait = if matches!(state, State::RenewRequested) {
                    state::RETRY_INTERVALS[0].min(remaining.max(Duration::from_secs(1)))
                } else {
                    state::halve_remaining(remaining).max(Duration::from_secs(1)).min(remaining.max(Duration::from_secs(1)))
                };

                let mut recv_buf = [0u8; 1500];
                match wait_udp(udp, &mut recv_buf, wait, signals).await {
                    UdpEvent::Packet(len) => {
                        if let Ok(reply) = Packet::decode(&recv_buf[..len]) {
                            if client::is_ack(&reply, xid, mac) {
                                let new_settings = Settings::from_ack(&reply, s.lease);
                                on_bound(cli, new_settings, &mut settings, &mut bound_at, &mut pidfile)?;
                                state = State::Bound;
                            } else if client::is_nak(&reply, xid, mac) {
                                run_script(cli, "deconfig", Some(&s));
                                settings = None;
                                state = State::InitSelecting;
                                xid = rand::random();
                                schedule.reset();
                            }
                        }
                    }
                    UdpEvent::Timeout => {
                        if Instant::now() >= t2_deadline {
                            state = State::Rebinding;
                        } else if matches!(state, State::RenewRequested) {
                            state = State::Renewing;
                        }
                    }
                    UdpEvent::Signaled => {}
                }
            }

            State::Rebinding => {
                let s = settings.clone().expect("settings present while rebinding");
                let (packet, opts) = client::request_renew(xid, 0, &identity, s.ip, true);
                let mut buf = [0u8; 576];
                let encoded = packet.encode(&mut buf, &opts)?;
                let udp = listeners.udp.as_ref().expect("udp socket open while rebinding");
                udp.send_to(SocketAddrV4::new(Ipv4Addr::BROADCAST, SERVER_PORT), encoded).await?;
                debug!("sent rebind REQUEST xid={xid:#x}");

                let expiry = bound_at + s.lease;
                let remaining = expiry.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    run_script(cli, "deconfig", Some(&s));
                    settings = None;
                    state = State::InitSelecting;
                    xid = rand::random();
                    schedule.reset();
                    continue;
                }

                let wait = state::halve_remaining(remaining).max(Duration::from_secs(1)).min(remaining);
                let mut recv_buf = [0u8; 1500];
                match wait_udp(udp, &mut recv_buf, wait, signals).await {
                    UdpEvent::Packet(len) => {
                        if let Ok(reply) = Packet::decode(&recv_buf[..len]) {
                            if client::is_ack(&reply, xid, mac) {
                                let new_settings = Settings::from_ack(&reply, s.lease);
                                on_bound(cli, new_settings, &mut settings, &mut bound_at, &mut pidfile)?;
                                state = State::Bound;
                            } else if client::is_nak(&reply, xid, mac) {
                                run_script(cli, "deconfig", Some(&s));
                                settings = None;
                                state = State::InitSelecting;
                                xid = rand::random();
                                schedule.reset();
                            }
                        }
                    }
                    UdpEvent::Timeout | UdpEvent::Signaled => {}
                }
            }

            State::Released => {
                sleep_until_signal(Instant::now() + Duration::from_secs(3600), signals).await;
            }
        }
    }
}

fn on_bound(
    cli: &Cli,
    new_settings: Settings,
    settings: &mut Option<Settings>,
    bound_at: &mut Instant,
    pidfile: &mut Option<dhcp_glue::PidFile>,
) -> anyhow::Result<()> {
    info!("bound to {} for {}s", new_settings.ip, new_settings.lease.as_secs());
    run_script(cli, "bound", Some(&new_settings));
    *settings = Some(new_settings);
    *bound_at = Instant::now();

    if pidfile.is_none() {
        if !cli.foreground {
            dhcp_glue::daemonize().context("daemonizing")?;
        }
        *pidfile = Some(dhcp_glue::PidFile::create(&cli.pidfile).context("creating pidfile")?);
    }

    Ok(())
}
