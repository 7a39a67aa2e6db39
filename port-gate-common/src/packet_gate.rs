use crate::counters::{CounterBank, CounterIndex};
use crate::cursor::{HeaderCursor, PacketView};
use crate::error::GateError;
use crate::headers::{EthHdr, TcpHdr, ETH_P_IPV4, ETH_P_IPV6, IPPROTO_TCP};
use crate::matcher::{segment_matches, TcpPorts};
use crate::policy::{PolicyRole, PolicyStore};
use crate::verdict::PacketVerdict;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PassReason {
    /// TCP segment whose ports differ from the blocked port.
    NoMatch(TcpPorts),
    /// IPv6 frames are counted but their payload is not inspected.
    Ipv6Uninspected,
    /// Classification stopped before a comparison could be made.
    Skipped(GateError),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PacketDecision {
    Pass(PassReason),
    Drop(TcpPorts),
}

impl PacketDecision {
    #[inline(always)]
    pub fn verdict(&self) -> PacketVerdict {
        match self {
            PacketDecision::Pass(_) => PacketVerdict::Pass,
            PacketDecision::Drop(_) => PacketVerdict::Drop,
        }
    }
}

/// Block-list enforcement at ingress.
///
/// Walks Ethernet, IPv4 and TCP headers with a bounds-checked cursor and
/// drops the frame when either TCP port equals the blocked port. Anything
/// that cannot be classified passes, and so does everything while no blocked
/// port is configured.
pub struct PacketGate<P, C> {
    policy: P,
    counters: C,
}

impl<P: PolicyStore, C: CounterBank> PacketGate<P, C> {
    pub fn new(policy: P, counters: C) -> Self {
        Self { policy, counters }
    }

    #[inline(always)]
    pub fn inspect(&self, view: PacketView<'_>) -> PacketDecision {
        self.counters.increment(CounterIndex::TotalPackets);

        let (eth, cursor) = match view.cursor().take::<EthHdr>() {
            Ok(taken) => taken,
            Err(err) => return PacketDecision::Pass(PassReason::Skipped(err.into())),
        };

        match eth.ether_type() {
            ETH_P_IPV4 => match self.ipv4_tcp_ports(cursor) {
                Ok(ports) => self.compare(ports),
                Err(err) => PacketDecision::Pass(PassReason::Skipped(err)),
            },
            ETH_P_IPV6 => {
                self.counters.increment(CounterIndex::Ipv6Packets);
                PacketDecision::Pass(PassReason::Ipv6Uninspected)
            }
            other => PacketDecision::Pass(PassReason::Skipped(GateError::UnsupportedEtherType(
                other,
            ))),
        }
    }

    #[inline(always)]
    fn ipv4_tcp_ports(&self, cursor: HeaderCursor<'_>) -> Result<TcpPorts, GateError> {
        let (ip, cursor) = cursor.take_ipv4()?;
        self.counters.increment(CounterIndex::Ipv4Packets);

        if ip.protocol() != IPPROTO_TCP {
            return Err(GateError::UnsupportedTransport(ip.protocol()));
        }
        if ip.fragment_offset() != 0 {
            return Err(GateError::NonInitialFragment);
        }

        let (tcp, _) = cursor.take::<TcpHdr>()?;
        self.counters.increment(CounterIndex::TcpPackets);

        Ok(TcpPorts {
            source: tcp.source_port(),
            dest: tcp.dest_port(),
        })
    }

    #[inline(always)]
    fn compare(&self, ports: TcpPorts) -> PacketDecision {
        let Some(blocked) = self.policy.lookup(PolicyRole::Blocked) else {
            return PacketDecision::Pass(PassReason::Skipped(GateError::PolicyUnconfigured));
        };
        if segment_matches(ports, blocked) {
            self.counters.increment(CounterIndex::PortMatches);
            self.counters.increment(CounterIndex::DroppedPackets);
            PacketDecision::Drop(ports)
        } else {
            PacketDecision::Pass(PassReason::NoMatch(ports))
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::counters::AtomicCounterBank;
    use crate::headers::MIN_CLASSIFIABLE_LEN;
    use crate::policy::StaticPolicy;
    use std::vec::Vec;

    const IPPROTO_UDP: u8 = 17;

    struct Frame {
        ether_type: u16,
        ihl: u8,
        protocol: u8,
        frag_off: u16,
        src_port: u16,
        dst_port: u16,
    }

    impl Frame {
        fn tcp(src_port: u16, dst_port: u16) -> Self {
            Self {
                ether_type: ETH_P_IPV4,
                ihl: 5,
                protocol: IPPROTO_TCP,
                frag_off: 0,
                src_port,
                dst_port,
            }
        }

        fn build(&self) -> Vec<u8> {
            let mut out = Vec::new();
            out.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
            out.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
            out.extend_from_slice(&self.ether_type.to_be_bytes());

            let ip_len = self.ihl as usize * 4;
            let mut ip = std::vec![0u8; ip_len.max(20)];
            ip[0] = 0x40 | self.ihl;
            ip[2..4].copy_from_slice(&((ip_len + 20) as u16).to_be_bytes());
            ip[6..8].copy_from_slice(&self.frag_off.to_be_bytes());
            ip[8] = 64;
            ip[9] = self.protocol;
            ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
            ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
            out.extend_from_slice(&ip);

            let mut tcp = [0u8; 20];
            tcp[0..2].copy_from_slice(&self.src_port.to_be_bytes());
            tcp[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
            tcp[12] = 0x50;
            out.extend_from_slice(&tcp);
            out
        }
    }

    fn inspect(policy: StaticPolicy, counters: &AtomicCounterBank, bytes: &[u8]) -> PacketDecision {
        PacketGate::new(policy, counters).inspect(PacketView::from_slice(bytes))
    }

    #[test]
    fn short_frames_always_pass() {
        let frame = Frame::tcp(443, 443).build();
        assert_eq!(frame.len(), MIN_CLASSIFIABLE_LEN);
        let counters = AtomicCounterBank::new();
        for len in 0..MIN_CLASSIFIABLE_LEN {
            for policy in [StaticPolicy::unconfigured(), StaticPolicy::blocking(443)] {
                let decision = inspect(policy, &counters, &frame[..len]);
                assert_eq!(decision.verdict(), PacketVerdict::Pass, "len {len}");
            }
        }
        assert_eq!(counters.read(CounterIndex::DroppedPackets), 0);
        assert_eq!(counters.read(CounterIndex::PortMatches), 0);
    }

    #[test]
    fn unconfigured_block_list_passes_everything() {
        let counters = AtomicCounterBank::new();
        let decision = inspect(
            StaticPolicy::unconfigured(),
            &counters,
            &Frame::tcp(80, 8080).build(),
        );
        assert_eq!(
            decision,
            PacketDecision::Pass(PassReason::Skipped(GateError::PolicyUnconfigured))
        );
        assert_eq!(counters.read(CounterIndex::TotalPackets), 1);
        assert_eq!(counters.read(CounterIndex::Ipv4Packets), 1);
        assert_eq!(counters.read(CounterIndex::TcpPackets), 1);
        assert_eq!(counters.read(CounterIndex::Ipv6Packets), 0);
        assert_eq!(counters.read(CounterIndex::PortMatches), 0);
        assert_eq!(counters.read(CounterIndex::DroppedPackets), 0);
    }

    #[test]
    fn blocked_destination_port_drops() {
        let counters = AtomicCounterBank::new();
        let decision = inspect(
            StaticPolicy::blocking(443),
            &counters,
            &Frame::tcp(51000, 443).build(),
        );
        assert_eq!(
            decision,
            PacketDecision::Drop(TcpPorts {
                source: 51000,
                dest: 443
            })
        );
        assert_eq!(counters.read(CounterIndex::PortMatches), 1);
        assert_eq!(counters.read(CounterIndex::DroppedPackets), 1);
    }

    #[test]
    fn blocked_source_port_drops() {
        let counters = AtomicCounterBank::new();
        let decision = inspect(
            StaticPolicy::blocking(443),
            &counters,
            &Frame::tcp(443, 51000).build(),
        );
        assert_eq!(decision.verdict(), PacketVerdict::Drop);
    }

    #[test]
    fn unrelated_ports_pass() {
        let counters = AtomicCounterBank::new();
        let decision = inspect(
            StaticPolicy::blocking(443),
            &counters,
            &Frame::tcp(51000, 80).build(),
        );
        assert_eq!(
            decision,
            PacketDecision::Pass(PassReason::NoMatch(TcpPorts {
                source: 51000,
                dest: 80
            }))
        );
        assert_eq!(counters.read(CounterIndex::PortMatches), 0);
    }

    #[test]
    fn truncated_inside_ipv4_header_passes() {
        let frame = Frame::tcp(443, 443).build();
        let counters = AtomicCounterBank::new();
        let decision = inspect(
            StaticPolicy::blocking(443),
            &counters,
            &frame[..crate::headers::ETH_HDR_LEN + 4],
        );
        assert_eq!(
            decision,
            PacketDecision::Pass(PassReason::Skipped(GateError::OutOfBounds))
        );
        assert_eq!(counters.read(CounterIndex::TotalPackets), 1);
        assert_eq!(counters.read(CounterIndex::Ipv4Packets), 0);
        assert_eq!(counters.read(CounterIndex::PortMatches), 0);
        assert_eq!(counters.read(CounterIndex::DroppedPackets), 0);
    }

    #[test]
    fn ip_options_shift_the_tcp_header() {
        let frame = Frame {
            ihl: 7,
            ..Frame::tcp(1234, 443)
        }
        .build();
        let counters = AtomicCounterBank::new();
        let decision = inspect(StaticPolicy::blocking(443), &counters, &frame);
        assert_eq!(
            decision,
            PacketDecision::Drop(TcpPorts {
                source: 1234,
                dest: 443
            })
        );
    }

    #[test]
    fn declared_options_past_the_end_pass() {
        let mut frame = Frame::tcp(1234, 443).build();
        frame[crate::headers::ETH_HDR_LEN] = 0x4f;
        frame.truncate(crate::headers::ETH_HDR_LEN + 40);
        let counters = AtomicCounterBank::new();
        let decision = inspect(StaticPolicy::blocking(443), &counters, &frame);
        assert_eq!(
            decision,
            PacketDecision::Pass(PassReason::Skipped(GateError::OutOfBounds))
        );
    }

    #[test]
    fn short_ihl_is_not_parsed_as_tcp() {
        let mut frame = Frame::tcp(443, 443).build();
        frame[crate::headers::ETH_HDR_LEN] = 0x42;
        let counters = AtomicCounterBank::new();
        let decision = inspect(StaticPolicy::blocking(443), &counters, &frame);
        assert_eq!(
            decision,
            PacketDecision::Pass(PassReason::Skipped(GateError::Malformed))
        );
    }

    #[test]
    fn non_tcp_transport_passes_without_comparison() {
        let frame = Frame {
            protocol: IPPROTO_UDP,
            ..Frame::tcp(443, 443)
        }
        .build();
        let counters = AtomicCounterBank::new();
        let decision = inspect(StaticPolicy::blocking(443), &counters, &frame);
        assert_eq!(
            decision,
            PacketDecision::Pass(PassReason::Skipped(GateError::UnsupportedTransport(
                IPPROTO_UDP
            )))
        );
        assert_eq!(counters.read(CounterIndex::Ipv4Packets), 1);
        assert_eq!(counters.read(CounterIndex::TcpPackets), 0);
    }

    #[test]
    fn later_fragments_pass() {
        let frame = Frame {
            frag_off: 185,
            ..Frame::tcp(443, 443)
        }
        .build();
        let counters = AtomicCounterBank::new();
        let decision = inspect(StaticPolicy::blocking(443), &counters, &frame);
        assert_eq!(
            decision,
            PacketDecision::Pass(PassReason::Skipped(GateError::NonInitialFragment))
        );

        // More-fragments flag alone still carries the TCP header.
        let first = Frame {
            frag_off: 0x2000,
            ..Frame::tcp(443, 80)
        }
        .build();
        let decision = inspect(StaticPolicy::blocking(443), &counters, &first);
        assert_eq!(decision.verdict(), PacketVerdict::Drop);
    }

    #[test]
    fn ipv6_is_counted_and_passed() {
        let frame = Frame {
            ether_type: ETH_P_IPV6,
            ..Frame::tcp(443, 443)
        }
        .build();
        let counters = AtomicCounterBank::new();
        let decision = inspect(StaticPolicy::blocking(443), &counters, &frame);
        assert_eq!(decision, PacketDecision::Pass(PassReason::Ipv6Uninspected));
        assert_eq!(counters.read(CounterIndex::Ipv6Packets), 1);
        assert_eq!(counters.read(CounterIndex::TcpPackets), 0);
    }

    #[test]
    fn unknown_ether_type_passes() {
        let frame = Frame {
            ether_type: 0x0806,
            ..Frame::tcp(443, 443)
        }
        .build();
        let counters = AtomicCounterBank::new();
        let decision = inspect(StaticPolicy::blocking(443), &counters, &frame);
        assert_eq!(
            decision,
            PacketDecision::Pass(PassReason::Skipped(GateError::UnsupportedEtherType(0x0806)))
        );
    }

    #[test]
    fn drop_counters_track_drops_only() {
        let counters = AtomicCounterBank::new();
        let gate = PacketGate::new(StaticPolicy::blocking(22), &counters);
        let dropping = Frame::tcp(50000, 22).build();
        let passing = Frame::tcp(50000, 80).build();

        let mut last_dropped = 0;
        for round in 0..5u64 {
            gate.inspect(PacketView::from_slice(&dropping));
            gate.inspect(PacketView::from_slice(&passing));
            gate.inspect(PacketView::from_slice(&passing));

            let dropped = counters.read(CounterIndex::DroppedPackets);
            assert!(dropped >= last_dropped);
            last_dropped = dropped;
            assert_eq!(dropped, round + 1);
            assert_eq!(counters.read(CounterIndex::PortMatches), round + 1);
        }
        assert_eq!(counters.read(CounterIndex::TotalPackets), 15);
        assert!(counters.snapshot().is_consistent());
    }
}
