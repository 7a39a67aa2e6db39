// Kernel-side storage for the policy cells and counters, plus the adapters
// that expose them to the gates in `port_gate_common`.
//
// Map names must match `port_gate_common::maps`.

use core::sync::atomic::{AtomicU64, Ordering};

use aya_ebpf::macros::map;
use aya_ebpf::maps::{Array, HashMap};
use port_gate_common::maps::CONFIG_SLOT;
use port_gate_common::{
    CounterBank, CounterIndex, PolicyRole, PolicyStore, ProtocolScope, SocketGateConfig,
    COUNTER_SLOTS, POLICY_KEY,
};

// Hash maps rather than arrays: an array slot always exists, which would make
// "never configured" read back as port 0.
#[map(name = "ALLOWED_PORT")]
static ALLOWED_PORT: HashMap<u32, u16> = HashMap::<u32, u16>::with_max_entries(1, 0);

#[map(name = "BLOCKED_PORT")]
static BLOCKED_PORT: HashMap<u32, u16> = HashMap::<u32, u16>::with_max_entries(1, 0);

#[map(name = "GATE_COUNTERS")]
static GATE_COUNTERS: Array<u64> = Array::<u64>::with_max_entries(COUNTER_SLOTS as u32, 0);

#[map(name = "SOCKET_GATE_CONFIG")]
static SOCKET_GATE_CONFIG: Array<SocketGateConfig> =
    Array::<SocketGateConfig>::with_max_entries(1, 0);

pub struct KernelPolicy;

impl PolicyStore for KernelPolicy {
    #[inline(always)]
    fn lookup(&self, role: PolicyRole) -> Option<u16> {
        let map = match role {
            PolicyRole::Allowed => &ALLOWED_PORT,
            PolicyRole::Blocked => &BLOCKED_PORT,
        };
        // SAFETY: the value is a single u16 copied out immediately; the
        // control plane replaces it with one map update.
        unsafe { map.get(&POLICY_KEY) }.copied()
    }
}

pub struct KernelCounters;

impl CounterBank for KernelCounters {
    #[inline(always)]
    fn increment(&self, index: CounterIndex) {
        if let Some(ptr) = GATE_COUNTERS.get_ptr_mut(index.slot()) {
            // SAFETY: array map values are 8-byte aligned and live as long as
            // the map. Every CPU updates the slot through atomics only.
            let slot = unsafe { AtomicU64::from_ptr(ptr) };
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[inline(always)]
pub fn socket_scope() -> ProtocolScope {
    match SOCKET_GATE_CONFIG.get(CONFIG_SLOT) {
        Some(cfg) => ProtocolScope::from(*cfg),
        None => ProtocolScope::AllProtocols,
    }
}
