#[cfg(not(target_arch = "bpf"))]
use core::sync::atomic::{AtomicU64, Ordering};

/// Number of slots in the counter map. Only the first `CounterIndex::ALL.len()`
/// are written; the rest are reserved.
pub const COUNTER_SLOTS: usize = 10;

/// Closed set of events counted by the packet gate.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CounterIndex {
    TotalPackets = 0,
    Ipv4Packets = 1,
    Ipv6Packets = 2,
    TcpPackets = 3,
    PortMatches = 4,
    DroppedPackets = 5,
}

impl CounterIndex {
    pub const ALL: [CounterIndex; 6] = [
        CounterIndex::TotalPackets,
        CounterIndex::Ipv4Packets,
        CounterIndex::Ipv6Packets,
        CounterIndex::TcpPackets,
        CounterIndex::PortMatches,
        CounterIndex::DroppedPackets,
    ];

    #[inline(always)]
    pub const fn slot(self) -> u32 {
        self as u32
    }

    pub const fn name(self) -> &'static str {
        match self {
            CounterIndex::TotalPackets => "total_packets",
            CounterIndex::Ipv4Packets => "ipv4_packets",
            CounterIndex::Ipv6Packets => "ipv6_packets",
            CounterIndex::TcpPackets => "tcp_packets",
            CounterIndex::PortMatches => "port_matches",
            CounterIndex::DroppedPackets => "dropped_packets",
        }
    }
}

/// Increment side of the counter bank.
///
/// Implementations must be wait-free and safe to call from every CPU at once
/// with the same index.
pub trait CounterBank {
    fn increment(&self, index: CounterIndex);
}

impl<C: CounterBank + ?Sized> CounterBank for &C {
    #[inline(always)]
    fn increment(&self, index: CounterIndex) {
        (**self).increment(index)
    }
}

#[cfg(not(target_arch = "bpf"))]
/// Counter bank backed by process memory.
pub struct AtomicCounterBank {
    slots: [AtomicU64; COUNTER_SLOTS],
}

#[cfg(not(target_arch = "bpf"))]
impl AtomicCounterBank {
    pub const fn new() -> Self {
        Self {
            slots: [const { AtomicU64::new(0) }; COUNTER_SLOTS],
        }
    }

    pub fn read(&self, index: CounterIndex) -> u64 {
        self.slots[index as usize].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let mut values = [0u64; COUNTER_SLOTS];
        for (value, slot) in values.iter_mut().zip(self.slots.iter()) {
            *value = slot.load(Ordering::Relaxed);
        }
        CounterSnapshot { values }
    }
}

#[cfg(not(target_arch = "bpf"))]
impl Default for AtomicCounterBank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_arch = "bpf"))]
impl CounterBank for AtomicCounterBank {
    #[inline(always)]
    fn increment(&self, index: CounterIndex) {
        self.slots[index as usize].fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of every counter slot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CounterSnapshot {
    pub values: [u64; COUNTER_SLOTS],
}

impl CounterSnapshot {
    pub fn get(&self, index: CounterIndex) -> u64 {
        self.values[index as usize]
    }

    /// Checks `drops <= matches <= tcp <= ipv4 + ipv6 <= total`.
    ///
    /// Slots of a live map are read one at a time, so `false` can be
    /// transient while packets are in flight.
    pub fn is_consistent(&self) -> bool {
        let ip = self
            .get(CounterIndex::Ipv4Packets)
            .saturating_add(self.get(CounterIndex::Ipv6Packets));
        self.get(CounterIndex::DroppedPackets) <= self.get(CounterIndex::PortMatches)
            && self.get(CounterIndex::PortMatches) <= self.get(CounterIndex::TcpPackets)
            && self.get(CounterIndex::TcpPackets) <= ip
            && ip <= self.get(CounterIndex::TotalPackets)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::vec::Vec;

    #[test]
    fn increments_land_in_their_slot() {
        let bank = AtomicCounterBank::new();
        bank.increment(CounterIndex::PortMatches);
        bank.increment(CounterIndex::PortMatches);
        bank.increment(CounterIndex::DroppedPackets);
        assert_eq!(bank.read(CounterIndex::PortMatches), 2);
        assert_eq!(bank.read(CounterIndex::DroppedPackets), 1);
        assert_eq!(bank.read(CounterIndex::TotalPackets), 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let bank = Arc::new(AtomicCounterBank::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bank = bank.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        bank.increment(CounterIndex::TotalPackets);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(bank.read(CounterIndex::TotalPackets), 80_000);
    }

    #[test]
    fn snapshot_consistency_follows_counter_ordering() {
        let mut snapshot = CounterSnapshot::default();
        assert!(snapshot.is_consistent());

        snapshot.values[CounterIndex::TotalPackets as usize] = 10;
        snapshot.values[CounterIndex::Ipv4Packets as usize] = 6;
        snapshot.values[CounterIndex::Ipv6Packets as usize] = 3;
        snapshot.values[CounterIndex::TcpPackets as usize] = 7;
        snapshot.values[CounterIndex::PortMatches as usize] = 2;
        snapshot.values[CounterIndex::DroppedPackets as usize] = 2;
        assert!(snapshot.is_consistent());

        snapshot.values[CounterIndex::DroppedPackets as usize] = 3;
        assert!(!snapshot.is_consistent());
    }

    #[test]
    fn slot_names_are_unique() {
        for (i, a) in CounterIndex::ALL.iter().enumerate() {
            assert_eq!(a.slot() as usize, i);
            for b in &CounterIndex::ALL[i + 1..] {
                assert_ne!(a.name(), b.name());
            }
        }
        assert!(CounterIndex::ALL.len() <= COUNTER_SLOTS);
    }
}
