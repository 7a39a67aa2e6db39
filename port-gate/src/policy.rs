use std::borrow::BorrowMut;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use aya::Ebpf;
use aya::maps::{Array, HashMap, Map, MapData, MapError};
use clap::ValueEnum;
use port_gate_common::maps::{CONFIG_SLOT, SOCKET_GATE_CONFIG};
use port_gate_common::{POLICY_KEY, PolicyRole, SocketGateConfig};

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Role {
    Allowed,
    Blocked,
}

impl From<Role> for PolicyRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Allowed => PolicyRole::Allowed,
            Role::Blocked => PolicyRole::Blocked,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PortUpdate {
    Set(u16),
    Clear,
}

/// Writes the policy cell of a freshly loaded object.
pub fn write_port(bpf: &mut Ebpf, role: PolicyRole, port: u16) -> Result<()> {
    let name = role.map_name();
    let map = bpf
        .map_mut(name)
        .with_context(|| format!("map {name} not found"))?;
    let mut cell = HashMap::<_, u32, u16>::try_from(map)
        .with_context(|| format!("map {name} has unexpected type"))?;
    apply_update(&mut cell, name, PortUpdate::Set(port))
}

/// Updates the policy cell of a running gate through its pinned map.
pub fn update_pinned(pin_dir: &Path, role: PolicyRole, update: PortUpdate) -> Result<()> {
    let name = role.map_name();
    let path = pin_dir.join(name);
    let map_data = MapData::from_pin(&path)
        .map_err(|e| anyhow!("failed to open pinned map {}: {e}", path.display()))?;
    let map = Map::from_map_data(map_data).map_err(|e| anyhow!("invalid map type: {e}"))?;
    let mut cell = HashMap::<_, u32, u16>::try_from(map)
        .with_context(|| format!("pinned map {name} has unexpected type"))?;
    apply_update(&mut cell, name, update)
}

fn apply_update<T: BorrowMut<MapData>>(
    cell: &mut HashMap<T, u32, u16>,
    name: &str,
    update: PortUpdate,
) -> Result<()> {
    match update {
        PortUpdate::Set(port) => cell
            .insert(POLICY_KEY, port, 0)
            .with_context(|| format!("failed to write port {port} to {name}")),
        PortUpdate::Clear => match cell.get(&POLICY_KEY, 0) {
            Ok(_) => cell
                .remove(&POLICY_KEY)
                .with_context(|| format!("failed to clear {name}")),
            Err(MapError::KeyNotFound) => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to read {name}")),
        },
    }
}

pub fn write_socket_config(bpf: &mut Ebpf, cfg: SocketGateConfig) -> Result<()> {
    let map = bpf
        .map_mut(SOCKET_GATE_CONFIG)
        .with_context(|| format!("map {SOCKET_GATE_CONFIG} not found"))?;
    let mut array = Array::<_, SocketGateConfig>::try_from(map)
        .context("socket gate config map has unexpected type")?;
    array
        .set(CONFIG_SLOT, cfg, 0)
        .context("failed to write socket gate config")?;
    Ok(())
}

/// Parses the value of `--port`, rejecting anything outside 0..=65535.
pub fn parse_port(raw: &str) -> Result<u16> {
    let value: u32 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid port '{raw}'"))?;
    u16::try_from(value).map_err(|_| anyhow!("port {value} is out of range (0-65535)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_port_accepts_full_range() {
        assert_eq!(parse_port("0").unwrap(), 0);
        assert_eq!(parse_port(" 443 ").unwrap(), 443);
        assert_eq!(parse_port("65535").unwrap(), u16::MAX);
    }

    #[test]
    fn parse_port_rejects_garbage() {
        assert!(parse_port("65536").is_err());
        assert!(parse_port("-1").is_err());
        assert!(parse_port("http").is_err());
    }

    #[test]
    fn roles_map_to_policy_cells() {
        assert_eq!(PolicyRole::from(Role::Allowed), PolicyRole::Allowed);
        assert_eq!(PolicyRole::from(Role::Blocked).map_name(), "BLOCKED_PORT");
    }
}
