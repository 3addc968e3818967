//! Point-to-point transfer test maths.

use std::time::Duration;

use serde::Serialize;

use crate::device::DeviceIndex;

/// Links slower than this are flagged as a likely interconnect problem.
pub const LOW_TRANSFER_SPEED_GBPS: f64 = 20.0;

pub const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;

/// Every ordered (src, dst) pair with `src != dst`, src-major.
pub fn ordered_pairs(device_count: u32) -> Vec<(DeviceIndex, DeviceIndex)> {
    (0..device_count)
        .flat_map(|src| {
            (0..device_count)
                .filter(move |dst| *dst != src)
                .map(move |dst| (src, dst))
        })
        .collect()
}

/// Transfer speed in gigabits per second.
///
/// The payload size is measured in GiB and multiplied by eight, matching how
/// operators have always read these numbers.
pub fn transfer_speed_gbps(bytes: u64, elapsed: Duration) -> Option<f64> {
    if elapsed.is_zero() {
        return None;
    }
    let gib = bytes as f64 / BYTES_PER_GIB as f64;
    Some(gib * 8.0 / elapsed.as_secs_f64())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairResult {
    pub src: DeviceIndex,
    pub dst: DeviceIndex,
    /// `Ok(speed in Gb/s)` or the error message for this pair.
    pub speed_gbps: Result<f64, String>,
}

impl PairResult {
    pub fn is_slow(&self, threshold_gbps: f64) -> bool {
        matches!(self.speed_gbps, Ok(speed) if speed < threshold_gbps)
    }
}

/// Pairs whose measured speed is below `threshold_gbps`.
pub fn slow_links(results: &[PairResult], threshold_gbps: f64) -> Vec<&PairResult> {
    results.iter().filter(|r| r.is_slow(threshold_gbps)).collect()
}
