//! Device identity as discovered from the compute backend.

use serde::Serialize;

/// Ordinal index of an accelerator, as the compute backend numbers them.
pub type DeviceIndex = u32;

pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// One discrete accelerator. Discovered once at startup, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub index: DeviceIndex,
    pub name: String,
    pub total_memory_bytes: u64,
}

impl Device {
    pub fn new(index: DeviceIndex, name: impl Into<String>, total_memory_bytes: u64) -> Self {
        Self {
            index,
            name: name.into(),
            total_memory_bytes,
        }
    }

    pub fn total_memory_mb(&self) -> u64 {
        self.total_memory_bytes / BYTES_PER_MB
    }
}

/// Remove repeated indices from a selection, keeping the first occurrence.
///
/// Every selected index yields exactly one outcome, so `--gpu 0 0 1` runs
/// device 0 once.
pub fn dedup_selection(selection: &[DeviceIndex]) -> Vec<DeviceIndex> {
    let mut seen = std::collections::HashSet::with_capacity(selection.len());
    selection
        .iter()
        .copied()
        .filter(|idx| seen.insert(*idx))
        .collect()
}
