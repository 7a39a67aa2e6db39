#![no_std]

// Verdict engine shared between the eBPF programs and userspace.
// Keep this crate `no_std`, allocation-free and loop-free on the packet path
// so it links into the eBPF object unchanged.

pub mod counters;
pub mod cursor;
pub mod error;
pub mod headers;
pub mod maps;
pub mod matcher;
pub mod packet_gate;
pub mod policy;
pub mod socket_gate;
pub mod verdict;

#[cfg(not(target_arch = "bpf"))]
pub use counters::AtomicCounterBank;
pub use counters::{CounterBank, CounterIndex, CounterSnapshot, COUNTER_SLOTS};
pub use cursor::{CursorError, HeaderCursor, PacketView};
pub use error::GateError;
pub use maps::SocketGateConfig;
pub use matcher::TcpPorts;
pub use packet_gate::{PacketDecision, PacketGate, PassReason};
pub use policy::{network_to_host_port, PolicyRole, PolicyStore, StaticPolicy, POLICY_KEY};
pub use socket_gate::{ProtocolScope, SocketGate, SocketHook, SocketRequest};
pub use verdict::{PacketVerdict, SocketVerdict};

// When compiled for userspace with the `user` feature enabled the crate
// exposes `aya::Pod` for the map value types so the loader can use aya's
// typed map APIs. The eBPF side never sees aya.
#[cfg(feature = "user")]
mod user_impls {
    extern crate aya;

    use super::SocketGateConfig;
    use aya::Pod;

    unsafe impl Pod for SocketGateConfig {}
}
