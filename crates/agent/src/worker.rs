//! Per-device stress worker.
//!
//! A [`DeviceWorker`] owns one device for the length of a run and walks
//! `Allocating → Running → (Completed | Failed)`. Each iteration runs one
//! saturation step on a blocking thread, credits its analytic FLOPs and
//! wall time, then samples telemetry in-line. Probe failures are counted and
//! skipped; compute faults end the run for this device only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinError;

use burnin_core::device::Device;
use burnin_core::outcome::{FailureKind, Outcome, StressMetrics};
use burnin_core::telemetry::RunningPeaks;
use burnin_core::workload::{step_flops_rate, Throughput};

use crate::backend::{BackendError, ComputeBackend};
use crate::kernel::{WorkloadKernel, WorkloadState};
use crate::probe::TelemetryProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Allocating,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Wall-clock budget for the stress loop, measured from worker start.
    pub duration: Duration,
    /// Stop after this many steps even if budget remains.
    pub max_iterations: Option<u64>,
}

pub struct DeviceWorker<B, P> {
    device: Device,
    kernel: WorkloadKernel<B>,
    probe: Arc<P>,
    settings: WorkerSettings,
    state: WorkerState,
}

impl<B: ComputeBackend, P: TelemetryProbe> DeviceWorker<B, P> {
    pub fn new(
        device: Device,
        kernel: WorkloadKernel<B>,
        probe: Arc<P>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            device,
            kernel,
            probe,
            settings,
            state: WorkerState::Allocating,
        }
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::debug!(
            gpu_index = self.device.index,
            from = ?self.state,
            to = ?next,
            "Worker state change",
        );
        self.state = next;
    }

    fn fail(&mut self, kind: FailureKind, message: String) -> Outcome {
        self.transition(WorkerState::Failed);
        tracing::error!(gpu_index = self.device.index, %kind, error = %message, "Stress test failed");
        Outcome::failure(kind, message)
    }

    /// Drive the device to a terminal state and return its outcome.
    ///
    /// Panics inside the backend are re-raised so the orchestrator can
    /// record them at its join boundary.
    pub async fn run(mut self) -> Outcome {
        let started = Instant::now();
        let index = self.device.index;
        tracing::info!(gpu_index = index, "Starting GPU stress test");

        let kernel = self.kernel.clone();
        let device = self.device.clone();
        let mut state = match tokio::task::spawn_blocking(move || kernel.allocate(&device)).await {
            Ok(Ok(state)) => state,
            Ok(Err(BackendError::OutOfMemory(msg))) => {
                return self.fail(
                    FailureKind::OutOfMemory,
                    format!("Out of memory error during tensor creation: {msg}"),
                );
            }
            Ok(Err(e)) => {
                return self.fail(
                    FailureKind::ComputeError,
                    format!("Backend error during tensor creation: {e}"),
                );
            }
            Err(join) => return self.join_failure(join),
        };

        self.transition(WorkerState::Running);
        let dim = state.dim;
        let mut peaks = RunningPeaks::new();
        let mut throughput = Throughput::new();
        let mut probe_failures: u32 = 0;

        while started.elapsed() < self.settings.duration {
            if self
                .settings
                .max_iterations
                .is_some_and(|cap| throughput.iterations >= cap)
            {
                break;
            }

            let (returned, result, elapsed) = match self.run_step(state).await {
                Ok(step) => step,
                Err(join) => return self.join_failure(join),
            };
            state = returned;

            if let Err(e) = result {
                drop(state);
                return self.fail(
                    FailureKind::ComputeError,
                    format!("Compute error during computation: {e}"),
                );
            }

            throughput.record(dim, elapsed);

            match self.probe.sample(index).await {
                Ok(sample) => {
                    peaks.observe(&sample);
                    tracing::debug!(
                        gpu_index = index,
                        iteration = throughput.iterations,
                        step_secs = elapsed.as_secs_f64(),
                        flops = step_flops_rate(dim, elapsed).unwrap_or(0.0),
                        used_memory_mb = sample.used_memory_mb,
                        temperature_c = sample.temperature_c,
                        "Iteration complete",
                    );
                }
                Err(e) => {
                    probe_failures += 1;
                    tracing::warn!(
                        gpu_index = index,
                        iteration = throughput.iterations,
                        error = %e,
                        "Telemetry sample failed -- continuing",
                    );
                }
            }
        }

        drop(state);
        self.transition(WorkerState::Completed);

        let metrics = StressMetrics::from_run(dim, &peaks, &throughput, probe_failures);
        tracing::info!(
            gpu_index = index,
            iterations = metrics.iterations,
            peak_memory_utilization_pct = metrics.peak_memory_utilization_pct,
            peak_temperature_c = metrics.peak_temperature_c,
            average_flops = ?metrics.average_flops,
            probe_failures,
            "Test completed",
        );
        Outcome::Success(metrics)
    }

    /// Run one step on a blocking thread, handing the workload back with
    /// the step result and its wall-clock duration.
    async fn run_step(
        &self,
        mut state: WorkloadState<B>,
    ) -> Result<(WorkloadState<B>, Result<f64, BackendError>, Duration), JoinError> {
        let kernel = self.kernel.clone();
        tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let result = kernel.step(&mut state);
            (state, result, start.elapsed())
        })
        .await
    }

    fn join_failure(&mut self, join: JoinError) -> Outcome {
        if join.is_panic() {
            std::panic::resume_unwind(join.into_panic());
        }
        self.fail(
            FailureKind::Unexpected,
            format!("Unexpected error - blocking task cancelled: {join}"),
        )
    }
}
