//! Terminal per-device outcomes of a stress run.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::device::DeviceIndex;
use crate::telemetry::RunningPeaks;
use crate::workload::Throughput;

/// Why a device produced no metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Requested index is not among the discovered devices. No worker ran.
    InvalidDevice,
    /// The workload could not be allocated.
    OutOfMemory,
    /// The backend faulted while running a step.
    ComputeError,
    /// Anything unmodelled, caught at the orchestrator join.
    Unexpected,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidDevice => "invalid device",
            Self::OutOfMemory => "out of memory",
            Self::ComputeError => "compute error",
            Self::Unexpected => "unexpected error",
        };
        f.write_str(s)
    }
}

/// Metrics of a run that reached its deadline without a fatal error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StressMetrics {
    pub peak_memory_utilization_pct: f64,
    pub peak_temperature_c: u32,
    pub peak_used_memory_mb: u64,
    /// `None` when no step completed inside the budget.
    pub average_flops: Option<f64>,
    pub matrix_dim: usize,
    pub iterations: u64,
    pub total_flops: u128,
    #[serde(with = "crate::workload::duration_secs")]
    pub compute_time: Duration,
    pub telemetry_samples: u32,
    /// Probe calls that failed and were skipped.
    pub probe_failures: u32,
}

impl StressMetrics {
    pub fn from_run(
        matrix_dim: usize,
        peaks: &RunningPeaks,
        throughput: &Throughput,
        probe_failures: u32,
    ) -> Self {
        Self {
            peak_memory_utilization_pct: peaks.max_memory_utilization_pct,
            peak_temperature_c: peaks.max_temperature_c,
            peak_used_memory_mb: peaks.max_used_memory_mb,
            average_flops: throughput.average_flops(),
            matrix_dim,
            iterations: throughput.iterations,
            total_flops: throughput.total_flops,
            compute_time: throughput.compute_time,
            telemetry_samples: peaks.samples,
            probe_failures,
        }
    }
}

/// Exactly one of these is produced per selected device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success(StressMetrics),
    Failure { kind: FailureKind, message: String },
}

impl Outcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failure { kind, .. } => Some(*kind),
            Self::Success(_) => None,
        }
    }
}

/// A device's entry in a run, in selection order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRun {
    pub index: DeviceIndex,
    /// Backend-reported name, or `None` when the index was never discovered.
    pub name: Option<String>,
    pub outcome: Outcome,
}

impl DeviceRun {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unknown device")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_serializes_with_status_tag() {
        let outcome = Outcome::failure(FailureKind::OutOfMemory, "CUDA out of memory");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "out_of_memory");
        assert_eq!(json["message"], "CUDA out of memory");
    }

    #[test]
    fn metrics_carry_unavailable_average_as_null() {
        let metrics = StressMetrics::from_run(0, &RunningPeaks::new(), &Throughput::new(), 3);
        assert_eq!(metrics.average_flops, None);
        assert_eq!(metrics.probe_failures, 3);
        let json = serde_json::to_value(Outcome::Success(metrics)).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json["average_flops"].is_null());
    }

    #[test]
    fn display_name_falls_back_for_unknown_devices() {
        let run = DeviceRun {
            index: 5,
            name: None,
            outcome: Outcome::failure(FailureKind::InvalidDevice, "out of range"),
        };
        assert_eq!(run.display_name(), "unknown device");
        assert_eq!(run.outcome.failure_kind(), Some(FailureKind::InvalidDevice));
    }
}
