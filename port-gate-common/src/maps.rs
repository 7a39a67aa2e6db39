// Names and value layouts of the maps shared by the eBPF object and the
// loader. The kernel side has to spell the names as literals in `#[map]`, so
// keep the two in sync by hand.

pub const ALLOWED_PORT: &str = "ALLOWED_PORT";
pub const BLOCKED_PORT: &str = "BLOCKED_PORT";
pub const GATE_COUNTERS: &str = "GATE_COUNTERS";
pub const SOCKET_GATE_CONFIG: &str = "SOCKET_GATE_CONFIG";

pub const ALL: [&str; 4] = [ALLOWED_PORT, BLOCKED_PORT, GATE_COUNTERS, SOCKET_GATE_CONFIG];

pub const XDP_PROGRAM: &str = "port_gate_xdp";
pub const CONNECT4_PROGRAM: &str = "port_gate_connect4";
pub const BIND4_PROGRAM: &str = "port_gate_bind4";
pub const CONNECT6_PROGRAM: &str = "port_gate_connect6";
pub const BIND6_PROGRAM: &str = "port_gate_bind6";

/// Slot of the socket gate configuration block.
pub const CONFIG_SLOT: u32 = 0;

/// Policy applies to every protocol.
pub const SCOPE_ALL_PROTOCOLS: u32 = 0;
/// Only TCP sockets are checked; everything else is allowed through.
pub const SCOPE_TCP_ONLY: u32 = 1;

/// Value stored in `SOCKET_GATE_CONFIG[CONFIG_SLOT]`. A zeroed block (the
/// state of a fresh array map) selects `SCOPE_ALL_PROTOCOLS`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SocketGateConfig {
    pub scope: u32,
    pub reserved: u32,
}

impl SocketGateConfig {
    pub const fn tcp_only(tcp_only: bool) -> Self {
        Self {
            scope: if tcp_only {
                SCOPE_TCP_ONLY
            } else {
                SCOPE_ALL_PROTOCOLS
            },
            reserved: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_names_are_distinct() {
        for (i, a) in ALL.iter().enumerate() {
            for b in &ALL[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn zeroed_config_covers_all_protocols() {
        assert_eq!(SocketGateConfig::default(), SocketGateConfig::tcp_only(false));
        assert_eq!(SocketGateConfig::tcp_only(true).scope, SCOPE_TCP_ONLY);
        assert_eq!(core::mem::size_of::<SocketGateConfig>(), 8);
    }
}
