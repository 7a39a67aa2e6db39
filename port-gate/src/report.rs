use std::borrow::Borrow;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use aya::Ebpf;
use aya::maps::{Array, Map, MapData};
use chrono::{DateTime, Utc};
use port_gate_common::maps::GATE_COUNTERS;
use port_gate_common::{CounterIndex, CounterSnapshot};
use serde_json::{Map as JsonMap, Number as JsonNumber, Value};
use tracing::{info, warn};

/// Reads the counter map of a loaded object.
pub fn counters_from_bpf(bpf: &Ebpf) -> Result<CounterSnapshot> {
    let map = bpf
        .map(GATE_COUNTERS)
        .with_context(|| format!("map {GATE_COUNTERS} not found"))?;
    let array = Array::<_, u64>::try_from(map).context("counter map has unexpected type")?;
    read_slots(&array)
}

/// Reads the counter map pinned by a running packet gate.
pub fn counters_from_pin(pin_dir: &Path) -> Result<CounterSnapshot> {
    let path = pin_dir.join(GATE_COUNTERS);
    let map_data = MapData::from_pin(&path)
        .map_err(|e| anyhow!("failed to open pinned map {}: {e}", path.display()))?;
    let map = Map::from_map_data(map_data).map_err(|e| anyhow!("invalid map type: {e}"))?;
    let array = Array::<_, u64>::try_from(map).context("counter map has unexpected type")?;
    read_slots(&array)
}

fn read_slots<T: Borrow<MapData>>(array: &Array<T, u64>) -> Result<CounterSnapshot> {
    let mut snapshot = CounterSnapshot::default();
    for (slot, value) in snapshot.values.iter_mut().enumerate() {
        let index = slot as u32;
        *value = array
            .get(&index, 0)
            .with_context(|| format!("failed to read counter slot {index}"))?;
    }
    Ok(snapshot)
}

pub fn counters_to_json(snapshot: &CounterSnapshot) -> Value {
    let mut counters = JsonMap::new();
    for index in CounterIndex::ALL {
        counters.insert(
            index.name().to_string(),
            Value::Number(JsonNumber::from(snapshot.get(index))),
        );
    }
    Value::Object(counters)
}

pub fn snapshot_to_json(snapshot: &CounterSnapshot, collected_at: DateTime<Utc>) -> Value {
    let mut obj = JsonMap::new();
    obj.insert(
        "collected_at".to_string(),
        Value::String(collected_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
    );
    obj.insert("counters".to_string(), counters_to_json(snapshot));
    obj.insert("consistent".to_string(), Value::Bool(snapshot.is_consistent()));
    Value::Object(obj)
}

pub fn log_snapshot(snapshot: &CounterSnapshot) {
    info!(
        total = snapshot.get(CounterIndex::TotalPackets),
        ipv4 = snapshot.get(CounterIndex::Ipv4Packets),
        ipv6 = snapshot.get(CounterIndex::Ipv6Packets),
        tcp = snapshot.get(CounterIndex::TcpPackets),
        matches = snapshot.get(CounterIndex::PortMatches),
        dropped = snapshot.get(CounterIndex::DroppedPackets),
        "packet gate counters"
    );
    if !snapshot.is_consistent() {
        warn!("counter snapshot out of order (read raced with traffic)");
    }
}
