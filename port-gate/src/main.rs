use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod classify;
mod ebpf_loader;
mod policy;
mod report;

#[derive(Parser)]
#[command(name = "port-gate")]
#[command(about = "Single-port admission control with XDP and cgroup socket hooks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Drop ingress TCP traffic to or from one port on an interface
    Packet(PacketCommand),
    /// Allow processes in a cgroup to connect to or bind only one port
    Socket(SocketCommand),
    /// Change or clear the port of a running gate through its pinned map
    SetPort(SetPortCommand),
    /// Print the packet gate counters of a running gate as JSON
    Counters(CountersCommand),
    /// Run one hex-encoded Ethernet frame through the packet gate offline
    Classify(ClassifyCommand),
}

#[derive(Args)]
struct PacketCommand {
    /// Network interface to attach the XDP program to
    #[arg(long, value_name = "IFACE")]
    iface: String,
    /// TCP port to drop; without it every packet passes
    #[arg(long, value_name = "PORT", value_parser = policy::parse_port)]
    port: Option<u16>,
    /// XDP attach mode
    #[arg(long, value_enum, default_value_t = ebpf_loader::XdpMode::Skb)]
    xdp_mode: ebpf_loader::XdpMode,
    /// Directory the policy and counter maps are pinned under
    #[arg(long, value_name = "DIR", default_value = ebpf_loader::DEFAULT_PIN_DIR)]
    pin_dir: PathBuf,
    /// Seconds between counter reports
    #[arg(long, default_value_t = 5)]
    report_interval_secs: u64,
}

#[derive(Args)]
struct SocketCommand {
    /// cgroup v2 directory whose processes are restricted
    #[arg(long, value_name = "PATH")]
    cgroup: PathBuf,
    /// The only port processes may connect to or bind; without it all are denied
    #[arg(long, value_name = "PORT", value_parser = policy::parse_port)]
    port: Option<u16>,
    /// Apply the policy to TCP sockets only and let other protocols through
    #[arg(long = "tcp-only", action = ArgAction::SetTrue)]
    tcp_only: bool,
    /// Directory the policy maps are pinned under
    #[arg(long, value_name = "DIR", default_value = ebpf_loader::DEFAULT_PIN_DIR)]
    pin_dir: PathBuf,
}

#[derive(Args)]
struct SetPortCommand {
    /// Policy cell to update
    #[arg(long, value_enum)]
    role: policy::Role,
    /// New port value
    #[arg(long, value_name = "PORT", value_parser = policy::parse_port, conflicts_with = "clear")]
    port: Option<u16>,
    /// Remove the configured port
    #[arg(long, action = ArgAction::SetTrue)]
    clear: bool,
    #[command(flatten)]
    target: GateTarget,
    #[arg(long, value_name = "DIR", default_value = ebpf_loader::DEFAULT_PIN_DIR)]
    pin_dir: PathBuf,
}

/// Which running gate to address. Each gate pins its maps in its own
/// directory below `--pin-dir`.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct GateTarget {
    /// Packet gate attached to this interface
    #[arg(long, value_name = "IFACE")]
    iface: Option<String>,
    /// Socket gate attached to this cgroup
    #[arg(long, value_name = "PATH")]
    cgroup: Option<PathBuf>,
}

#[derive(Args)]
struct CountersCommand {
    /// Interface of the packet gate to read
    #[arg(long, value_name = "IFACE")]
    iface: String,
    #[arg(long, value_name = "DIR", default_value = ebpf_loader::DEFAULT_PIN_DIR)]
    pin_dir: PathBuf,
}

#[derive(Args)]
struct ClassifyCommand {
    /// Frame bytes as hex, starting at the Ethernet header
    #[arg(long, value_name = "HEX")]
    hex: String,
    /// Blocked port to evaluate against
    #[arg(long, value_name = "PORT", value_parser = policy::parse_port)]
    blocked_port: Option<u16>,
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("port-gate error: {err:?}");
        exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Packet(cmd)) => {
            let opts = ebpf_loader::PacketGateOptions {
                iface: cmd.iface,
                blocked_port: cmd.port,
                xdp_mode: cmd.xdp_mode,
                pin_dir: cmd.pin_dir,
                report_interval: Duration::from_secs(cmd.report_interval_secs.max(1)),
            };
            ebpf_loader::run_packet_gate(opts).await?;
        }
        Some(Commands::Socket(cmd)) => {
            let opts = ebpf_loader::SocketGateOptions {
                cgroup: cmd.cgroup,
                allowed_port: cmd.port,
                tcp_only: cmd.tcp_only,
                pin_dir: cmd.pin_dir,
            };
            ebpf_loader::run_socket_gate(opts).await?;
        }
        Some(Commands::SetPort(cmd)) => {
            let update = port_update(cmd.port, cmd.clear)?;
            let gate_dir = gate_pin_dir(&cmd.pin_dir, cmd.role, &cmd.target)?;
            policy::update_pinned(&gate_dir, cmd.role.into(), update)?;
            tracing::info!(
                role = ?cmd.role,
                ?update,
                gate = %gate_dir.display(),
                "policy updated"
            );
        }
        Some(Commands::Counters(cmd)) => {
            let gate_dir = ebpf_loader::packet_gate_pin_dir(&cmd.pin_dir, &cmd.iface)?;
            let snapshot = report::counters_from_pin(&gate_dir)?;
            let value = report::snapshot_to_json(&snapshot, chrono::Utc::now());
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Some(Commands::Classify(cmd)) => {
            let frame = classify::parse_frame_hex(&cmd.hex)?;
            let result = classify::classify_frame(&frame, cmd.blocked_port);
            let value = classify::classification_to_json(&result);
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        None => {
            Cli::command().print_help().ok();
            println!();
        }
    }

    Ok(())
}

fn port_update(port: Option<u16>, clear: bool) -> Result<policy::PortUpdate> {
    match (port, clear) {
        (Some(port), false) => Ok(policy::PortUpdate::Set(port)),
        (None, true) => Ok(policy::PortUpdate::Clear),
        _ => bail!("pass exactly one of --port or --clear"),
    }
}

/// The blocked port lives in a packet gate and the allowed port in a socket
/// gate, so the role decides which target flag is valid.
fn gate_pin_dir(base: &Path, role: policy::Role, target: &GateTarget) -> Result<PathBuf> {
    match (role, &target.iface, &target.cgroup) {
        (policy::Role::Blocked, Some(iface), None) => {
            ebpf_loader::packet_gate_pin_dir(base, iface)
        }
        (policy::Role::Allowed, None, Some(cgroup)) => {
            ebpf_loader::socket_gate_pin_dir(base, cgroup)
        }
        (policy::Role::Blocked, ..) => {
            bail!("the blocked port belongs to a packet gate; pass --iface")
        }
        (policy::Role::Allowed, ..) => {
            bail!("the allowed port belongs to a socket gate; pass --cgroup")
        }
    }
}
