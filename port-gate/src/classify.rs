use anyhow::{Context, Result, ensure};
use port_gate_common::{
    AtomicCounterBank, CounterSnapshot, GateError, PacketDecision, PacketGate, PacketView,
    PassReason, StaticPolicy,
};
use serde_json::{Map as JsonMap, Value, json};

/// Outcome of running one frame through the packet gate in userspace.
pub struct Classification {
    pub decision: PacketDecision,
    pub counters: CounterSnapshot,
}

/// Decodes a frame written as hex. Whitespace and `:` separators are ignored
/// so output copied from tcpdump or Wireshark can be pasted as is.
pub fn parse_frame_hex(raw: &str) -> Result<Vec<u8>> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    ensure!(!cleaned.is_empty(), "frame is empty");
    hex::decode(&cleaned).context("frame is not valid hex")
}

pub fn classify_frame(frame: &[u8], blocked_port: Option<u16>) -> Classification {
    let counters = AtomicCounterBank::new();
    let policy = StaticPolicy {
        allowed: None,
        blocked: blocked_port,
    };
    let decision = PacketGate::new(policy, &counters).inspect(PacketView::from_slice(frame));
    Classification {
        decision,
        counters: counters.snapshot(),
    }
}

pub fn classification_to_json(result: &Classification) -> Value {
    let mut obj = JsonMap::new();
    let verdict = match result.decision {
        PacketDecision::Pass(_) => "pass",
        PacketDecision::Drop(_) => "drop",
    };
    obj.insert("verdict".to_string(), Value::String(verdict.to_string()));
    obj.insert(
        "reason".to_string(),
        Value::String(describe(&result.decision)),
    );
    match result.decision {
        PacketDecision::Drop(ports) | PacketDecision::Pass(PassReason::NoMatch(ports)) => {
            obj.insert(
                "ports".to_string(),
                json!({ "source": ports.source, "dest": ports.dest }),
            );
        }
        PacketDecision::Pass(_) => {}
    }
    obj.insert(
        "counters".to_string(),
        crate::report::counters_to_json(&result.counters),
    );
    Value::Object(obj)
}

fn describe(decision: &PacketDecision) -> String {
    match decision {
        PacketDecision::Drop(_) => "port matches blocked port".to_string(),
        PacketDecision::Pass(PassReason::NoMatch(_)) => "no port matches".to_string(),
        PacketDecision::Pass(PassReason::Ipv6Uninspected) => "ipv6 not inspected".to_string(),
        PacketDecision::Pass(PassReason::Skipped(err)) => match err {
            GateError::PolicyUnconfigured => "no blocked port configured".to_string(),
            GateError::OutOfBounds => "truncated frame".to_string(),
            GateError::Malformed => "malformed ipv4 header".to_string(),
            GateError::NonInitialFragment => "non-initial ipv4 fragment".to_string(),
            GateError::UnsupportedEtherType(ty) => format!("ether type {ty:#06x} not inspected"),
            GateError::UnsupportedTransport(proto) => format!("ip protocol {proto} not inspected"),
        },
    }
}
