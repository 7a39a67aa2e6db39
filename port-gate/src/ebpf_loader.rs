use std::{
    fs::{self, File},
    io,
    path::{Component, Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, ensure};
use aya::pin::PinError;
use aya::programs::cgroup_sock_addr::CgroupSockAddrLinkId;
use aya::programs::xdp::XdpLinkId;
use aya::programs::{CgroupAttachMode, CgroupSockAddr, Xdp, XdpFlags};
use aya::{Ebpf, include_bytes_aligned};
use clap::ValueEnum;
use port_gate_common::maps::{
    ALLOWED_PORT, BIND4_PROGRAM, BIND6_PROGRAM, BLOCKED_PORT, CONNECT4_PROGRAM, CONNECT6_PROGRAM,
    GATE_COUNTERS, SOCKET_GATE_CONFIG, XDP_PROGRAM,
};
use port_gate_common::{PolicyRole, SocketGateConfig};
use tokio::signal::unix::{self, Signal, SignalKind};
use tokio::time;
use tracing::{debug, info, warn};

use crate::{policy, report};

const EBPF_BYTES: &[u8] = include_bytes_aligned!(concat!(env!("OUT_DIR"), "/port-gate-ebpf"));

pub const DEFAULT_PIN_DIR: &str = "/sys/fs/bpf/port_gate";

const CGROUP2_MOUNT: &str = "/sys/fs/cgroup";

// Includes the trailing NUL.
const IFNAMSIZ: usize = 16;

const SOCKET_PROGRAMS: [&str; 4] = [
    CONNECT4_PROGRAM,
    BIND4_PROGRAM,
    CONNECT6_PROGRAM,
    BIND6_PROGRAM,
];

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum XdpMode {
    Skb,
    Driver,
    Hw,
}

#[derive(Clone, Debug)]
pub struct PacketGateOptions {
    pub iface: String,
    pub blocked_port: Option<u16>,
    pub xdp_mode: XdpMode,
    pub pin_dir: PathBuf,
    pub report_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct SocketGateOptions {
    pub cgroup: PathBuf,
    pub allowed_port: Option<u16>,
    pub tcp_only: bool,
    pub pin_dir: PathBuf,
}

/// Loads the object, blocks `blocked_port` at ingress on `iface` and reports
/// counters until SIGINT or SIGTERM.
pub async fn run_packet_gate(opts: PacketGateOptions) -> Result<()> {
    validate_packet_options(&opts)?;
    let pin_dir = packet_gate_pin_dir(&opts.pin_dir, &opts.iface)?;
    let mut shutdown = ShutdownSignal::install()?;

    let mut bpf = load_object()?;
    match opts.blocked_port {
        Some(port) => policy::write_port(&mut bpf, PolicyRole::Blocked, port)?,
        None => warn!("no blocked port configured; every packet will pass"),
    }

    let link = attach_xdp(&mut bpf, &opts.iface, opts.xdp_mode)?;
    let pins = PinnedMaps::pin(&mut bpf, &[BLOCKED_PORT, GATE_COUNTERS], &pin_dir)?;
    info!(
        iface = %opts.iface,
        blocked_port = ?opts.blocked_port,
        mode = ?opts.xdp_mode,
        pin_dir = %pin_dir.display(),
        "packet gate attached; send SIGINT or SIGTERM to detach"
    );

    let signal = report_until_shutdown(&bpf, opts.report_interval, &mut shutdown).await;

    info!(iface = %opts.iface, signal, "detaching packet gate");
    drop(pins);
    detach_xdp(&mut bpf, link)?;
    if let Ok(snapshot) = report::counters_from_bpf(&bpf) {
        report::log_snapshot(&snapshot);
    }
    Ok(())
}

/// Loads the object and restricts connect/bind in `cgroup` to
/// `allowed_port` until SIGINT or SIGTERM.
pub async fn run_socket_gate(opts: SocketGateOptions) -> Result<()> {
    validate_socket_options(&opts)?;
    let cgroup = resolve_cgroup(&opts.cgroup)?;
    let pin_dir = socket_pin_dir(&opts.pin_dir, &cgroup);
    let mut shutdown = ShutdownSignal::install()?;

    let mut bpf = load_object()?;
    match opts.allowed_port {
        Some(port) => policy::write_port(&mut bpf, PolicyRole::Allowed, port)?,
        None => warn!(
            cgroup = %cgroup.display(),
            "no allowed port configured; every connect and bind in the cgroup will be denied"
        ),
    }
    policy::write_socket_config(&mut bpf, SocketGateConfig::tcp_only(opts.tcp_only))?;

    let links = attach_cgroup(&mut bpf, &cgroup)?;
    let pins = PinnedMaps::pin(&mut bpf, &[ALLOWED_PORT, SOCKET_GATE_CONFIG], &pin_dir)?;
    info!(
        cgroup = %cgroup.display(),
        allowed_port = ?opts.allowed_port,
        tcp_only = opts.tcp_only,
        pin_dir = %pin_dir.display(),
        "socket gate attached (connect4, bind4, connect6, bind6); send SIGINT or SIGTERM to detach"
    );

    let signal = shutdown.recv().await;

    info!(cgroup = %cgroup.display(), signal, "detaching socket gate");
    drop(pins);
    detach_cgroup(&mut bpf, links)
}

/// Pin directory of the packet gate attached to `iface`.
pub fn packet_gate_pin_dir(base: &Path, iface: &str) -> Result<PathBuf> {
    validate_iface(iface)?;
    Ok(packet_pin_dir(base, iface))
}

/// Pin directory of the socket gate attached to `cgroup`. The path is
/// resolved first so every spelling of one cgroup lands in the same place.
pub fn socket_gate_pin_dir(base: &Path, cgroup: &Path) -> Result<PathBuf> {
    let cgroup = resolve_cgroup(cgroup)?;
    Ok(socket_pin_dir(base, &cgroup))
}

fn packet_pin_dir(base: &Path, iface: &str) -> PathBuf {
    base.join("xdp").join(iface)
}

fn socket_pin_dir(base: &Path, cgroup: &Path) -> PathBuf {
    base.join("cgroup").join(cgroup_label(cgroup))
}

/// Flattens the cgroup path below the cgroup2 mount into one directory name,
/// `/sys/fs/cgroup/app/web` becoming `app.web`.
fn cgroup_label(cgroup: &Path) -> String {
    let relative = cgroup.strip_prefix(CGROUP2_MOUNT).unwrap_or(cgroup);
    let parts: Vec<_> = relative
        .components()
        .filter_map(|part| match part {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        "root".to_string()
    } else {
        parts.join(".")
    }
}

fn resolve_cgroup(cgroup: &Path) -> Result<PathBuf> {
    fs::canonicalize(cgroup)
        .with_context(|| format!("failed to resolve cgroup {}", cgroup.display()))
}

fn validate_iface(iface: &str) -> Result<()> {
    ensure!(!iface.is_empty(), "interface name must not be empty");
    ensure!(
        iface.len() < IFNAMSIZ,
        "interface name {iface} is longer than {} bytes",
        IFNAMSIZ - 1
    );
    ensure!(
        iface != "." && iface != ".." && !iface.contains('/'),
        "invalid interface name {iface}"
    );
    Ok(())
}

fn validate_packet_options(opts: &PacketGateOptions) -> Result<()> {
    validate_iface(&opts.iface)?;
    ensure!(
        !opts.report_interval.is_zero(),
        "report interval must be greater than zero"
    );
    Ok(())
}

fn validate_socket_options(opts: &SocketGateOptions) -> Result<()> {
    ensure!(
        opts.cgroup.is_dir(),
        "cgroup path {} is not a directory",
        opts.cgroup.display()
    );
    Ok(())
}

fn load_object() -> Result<Ebpf> {
    let mut bpf = Ebpf::load(EBPF_BYTES).context("failed to load eBPF object")?;
    if let Err(err) = aya_log::EbpfLogger::init(&mut bpf) {
        warn!("failed to forward eBPF logs: {err}");
    }
    Ok(bpf)
}

/// SIGINT and SIGTERM both stop a running gate.
pub struct ShutdownSignal {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignal {
    /// Installs the handlers. Signals that arrive before `recv` is awaited
    /// are kept, so install before attaching anything.
    pub fn install() -> Result<Self> {
        Ok(Self {
            interrupt: unix::signal(SignalKind::interrupt())
                .context("failed to install SIGINT handler")?,
            terminate: unix::signal(SignalKind::terminate())
                .context("failed to install SIGTERM handler")?,
        })
    }

    /// Waits for the next shutdown signal and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

async fn report_until_shutdown(
    bpf: &Ebpf,
    interval: Duration,
    shutdown: &mut ShutdownSignal,
) -> &'static str {
    let mut ticker = time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            signal = shutdown.recv() => return signal,
            _ = ticker.tick() => {
                match report::counters_from_bpf(bpf) {
                    Ok(snapshot) => report::log_snapshot(&snapshot),
                    Err(err) => warn!("failed to read counters: {err:#}"),
                }
            }
        }
    }
}

/// Pins owned by one running gate. Dropping the guard removes them, so a
/// failed attach, a failed detach and a normal shutdown all clean up.
struct PinnedMaps {
    dir: PathBuf,
    paths: Vec<PathBuf>,
}

impl PinnedMaps {
    fn pin(bpf: &mut Ebpf, names: &[&str], dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let mut pinned = Self {
            dir: dir.to_path_buf(),
            paths: Vec::with_capacity(names.len()),
        };
        for name in names {
            let path = dir.join(name);
            pin_map(bpf, name, &path)?;
            pinned.paths.push(path);
        }
        Ok(pinned)
    }
}

impl Drop for PinnedMaps {
    fn drop(&mut self) {
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "unpinned"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(path = %path.display(), "failed to unpin: {err}"),
            }
        }
        // Only succeeds once the directory is empty.
        let _ = fs::remove_dir(&self.dir);
    }
}

fn pin_map(bpf: &mut Ebpf, map_name: &str, path: &Path) -> Result<()> {
    let map = bpf
        .map_mut(map_name)
        .with_context(|| format!("map {map_name} not found"))?;
    match map.pin(path) {
        Ok(()) => Ok(()),
        Err(PinError::SyscallError(err)) if err.io_error.kind() == io::ErrorKind::AlreadyExists => {
            // Pinning runs after the attach succeeded, and the attach owns the
            // interface or cgroup exclusively. A pin already in this gate's
            // directory was left by a gate that is no longer running.
            warn!(path = %path.display(), "replacing stale pin");
            fs::remove_file(path)
                .with_context(|| format!("failed to remove stale pin {}", path.display()))?;
            map.pin(path).map_err(|err| {
                anyhow!("failed to pin map {map_name} at {}: {err}", path.display())
            })
        }
        Err(err) => Err(anyhow!(
            "failed to pin map {map_name} at {}: {err}",
            path.display()
        )),
    }
}

fn attach_xdp(bpf: &mut Ebpf, iface: &str, mode: XdpMode) -> Result<XdpLinkId> {
    let program: &mut Xdp = bpf
        .program_mut(XDP_PROGRAM)
        .with_context(|| format!("program {XDP_PROGRAM} not found"))?
        .try_into()
        .context("xdp program has wrong type")?;
    program.load().context("failed to load xdp program")?;
    program
        .attach(iface, xdp_flags(mode))
        .with_context(|| format!("failed to attach xdp on {iface}"))
}

fn detach_xdp(bpf: &mut Ebpf, link: XdpLinkId) -> Result<()> {
    let program: &mut Xdp = bpf
        .program_mut(XDP_PROGRAM)
        .with_context(|| format!("program {XDP_PROGRAM} not found"))?
        .try_into()
        .context("xdp program has wrong type")?;
    program.detach(link).context("failed to detach xdp program")
}

type SocketLinks = Vec<(&'static str, CgroupSockAddrLinkId)>;

fn attach_cgroup(bpf: &mut Ebpf, cgroup: &Path) -> Result<SocketLinks> {
    let cgroup_fd = File::open(cgroup)
        .with_context(|| format!("failed to open cgroup {}", cgroup.display()))?;
    let mut links = Vec::with_capacity(SOCKET_PROGRAMS.len());
    for name in SOCKET_PROGRAMS {
        let program: &mut CgroupSockAddr = bpf
            .program_mut(name)
            .with_context(|| format!("program {name} not found"))?
            .try_into()
            .with_context(|| format!("{name} program has wrong type"))?;
        program
            .load()
            .with_context(|| format!("failed to load {name}"))?;
        let link = program
            .attach(&cgroup_fd, CgroupAttachMode::Single)
            .with_context(|| format!("failed to attach {name} to {}", cgroup.display()))?;
        debug!(program = name, "attached");
        links.push((name, link));
    }
    Ok(links)
}

fn detach_cgroup(bpf: &mut Ebpf, links: SocketLinks) -> Result<()> {
    for (name, link) in links {
        let program: &mut CgroupSockAddr = bpf
            .program_mut(name)
            .with_context(|| format!("program {name} not found"))?
            .try_into()
            .with_context(|| format!("{name} program has wrong type"))?;
        program
            .detach(link)
            .with_context(|| format!("failed to detach {name}"))?;
    }
    Ok(())
}

fn xdp_flags(mode: XdpMode) -> XdpFlags {
    match mode {
        XdpMode::Skb => XdpFlags::SKB_MODE,
        XdpMode::Driver => XdpFlags::DRV_MODE,
        XdpMode::Hw => XdpFlags::HW_MODE,
    }
}
