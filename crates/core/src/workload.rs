//! Workload sizing and FLOP accounting for the saturation step.
//!
//! A saturation step on two N×N matrices is C = A·B, D = sin(C) + cos(C),
//! R = sum(D). Its cost is counted analytically, never measured:
//! `2*N^3` for the product, `2*N^2` each for sin and cos, `N^2` for the
//! reduction.

use std::time::Duration;

use serde::Serialize;

/// Matrices are `f64`.
pub const BYTES_PER_ELEMENT: u64 = 8;

/// Share of device memory the resident matrices should occupy.
pub const DEFAULT_MEMORY_FRACTION: f64 = 0.9;

/// Dimension N of the square matrices for a device.
///
/// `resident_buffers` N×N buffers must fit in `fraction * total_memory_bytes`,
/// so `N = floor(sqrt(fraction * total / (resident_buffers * 8)))`. With the
/// usual two resident matrices this gives `2 * N^2 * 8 ≈ fraction * total`.
pub fn matrix_dimension(total_memory_bytes: u64, fraction: f64, resident_buffers: u32) -> usize {
    let buffers = u64::from(resident_buffers.max(1));
    let budget = fraction * total_memory_bytes as f64 / (buffers * BYTES_PER_ELEMENT) as f64;
    if !budget.is_finite() || budget < 1.0 {
        return 0;
    }

    // Correct for float rounding around perfect squares.
    let mut n = budget.sqrt().floor() as u64;
    while n > 0 && (n as f64) * (n as f64) > budget {
        n -= 1;
    }
    while ((n + 1) as f64) * ((n + 1) as f64) <= budget {
        n += 1;
    }
    n as usize
}

/// Bytes held by one N×N matrix.
pub fn matrix_bytes(dim: usize) -> u64 {
    (dim as u64) * (dim as u64) * BYTES_PER_ELEMENT
}

/// FLOPs of one saturation step on N×N matrices: `2*N^3 + 5*N^2`.
pub fn flops_per_step(dim: usize) -> u128 {
    let n = dim as u128;
    2 * n * n * n + 5 * n * n
}

/// Accumulated compute work for one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Throughput {
    pub iterations: u64,
    pub total_flops: u128,
    #[serde(with = "duration_secs")]
    pub compute_time: Duration,
}

impl Throughput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed step of dimension `dim` that took `elapsed`.
    /// Returns the FLOPs credited for the step.
    pub fn record(&mut self, dim: usize, elapsed: Duration) -> u128 {
        let flops = flops_per_step(dim);
        self.iterations += 1;
        self.total_flops += flops;
        self.compute_time += elapsed;
        flops
    }

    /// Total FLOPs over total compute time, or `None` when no compute time
    /// was accumulated (no step completed).
    pub fn average_flops(&self) -> Option<f64> {
        if self.compute_time.is_zero() {
            return None;
        }
        Some(self.total_flops as f64 / self.compute_time.as_secs_f64())
    }
}

/// Step rate for a single iteration, used for progress logging.
pub fn step_flops_rate(dim: usize, elapsed: Duration) -> Option<f64> {
    if elapsed.is_zero() {
        return None;
    }
    Some(flops_per_step(dim) as f64 / elapsed.as_secs_f64())
}

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flops_for_thousand() {
        assert_eq!(flops_per_step(1000), 2_005_000_000);
    }

    #[test]
    fn flops_small_dimensions() {
        assert_eq!(flops_per_step(1), 7);
        assert_eq!(flops_per_step(2), 2 * 8 + 5 * 4);
        assert_eq!(flops_per_step(10), 2_500);
    }

    #[test]
    fn flops_matches_formula_for_a_range() {
        for n in [3usize, 17, 256, 4096, 33_000] {
            let expected = 2 * (n as u128).pow(3) + 5 * (n as u128).pow(2);
            assert_eq!(flops_per_step(n), expected);
        }
    }

    #[test]
    fn dimension_for_two_resident_matrices() {
        // 2 * 1000^2 * 8 bytes = 16 MB exactly at fraction 1.0.
        assert_eq!(matrix_dimension(16_000_000, 1.0, 2), 1000);
        assert_eq!(matrix_dimension(15_999_999, 1.0, 2), 999);
    }

    #[test]
    fn dimension_scales_with_fraction() {
        let total = 80 * 1024 * 1024 * 1024u64;
        let n = matrix_dimension(total, DEFAULT_MEMORY_FRACTION, 2);
        let used = 2 * matrix_bytes(n);
        assert!(used as f64 <= DEFAULT_MEMORY_FRACTION * total as f64);
        assert!(2 * matrix_bytes(n + 1) > (DEFAULT_MEMORY_FRACTION * total as f64) as u64);
    }

    #[test]
    fn dimension_counts_extra_buffers() {
        assert!(matrix_dimension(1 << 30, 0.9, 3) < matrix_dimension(1 << 30, 0.9, 2));
    }

    #[test]
    fn dimension_zero_when_memory_too_small() {
        assert_eq!(matrix_dimension(8, 0.9, 2), 0);
        assert_eq!(matrix_dimension(0, 0.9, 2), 0);
    }

    #[test]
    fn average_unavailable_without_compute_time() {
        let t = Throughput::new();
        assert_eq!(t.average_flops(), None);
    }

    #[test]
    fn average_is_total_over_compute_time() {
        let mut t = Throughput::new();
        t.record(1000, Duration::from_millis(500));
        t.record(1000, Duration::from_millis(1500));
        assert_eq!(t.iterations, 2);
        assert_eq!(t.total_flops, 4_010_000_000);
        assert_eq!(t.average_flops(), Some(2_005_000_000.0));
    }

    #[test]
    fn step_rate_of_instant_step_is_unavailable() {
        assert_eq!(step_flops_rate(10, Duration::ZERO), None);
        assert_eq!(step_flops_rate(10, Duration::from_secs(1)), Some(2_500.0));
    }
}
