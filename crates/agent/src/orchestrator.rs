//! Multi-device orchestration.
//!
//! Discovers devices once, validates the selection, launches one
//! [`DeviceWorker`] task per valid device and joins all of them. Every
//! selected index ends up with exactly one [`DeviceRun`], in selection order:
//! out-of-range indices are failed before launch, workers that panic or
//! overrun the join deadline are failed at the join, and no worker is ever
//! cancelled because another one failed.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;

use burnin_core::device::{dedup_selection, Device, DeviceIndex};
use burnin_core::outcome::{DeviceRun, FailureKind, Outcome};
use burnin_core::verdict::{evaluate_with_note, Thresholds, Verdict};

use crate::backend::{BackendError, ComputeBackend};
use crate::kernel::WorkloadKernel;
use crate::probe::TelemetryProbe;
use crate::worker::{DeviceWorker, WorkerSettings};

/// Extra time allowed past the duration budget before a worker is
/// considered hung.
pub const DEFAULT_JOIN_GRACE: Duration = Duration::from_secs(120);

/// Which devices to stress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    /// Every discovered device.
    All,
    /// These indices, in this order. Repeats are ignored.
    Indices(Vec<DeviceIndex>),
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub memory_fraction: f64,
    pub max_iterations: Option<u64>,
    pub join_grace: Duration,
}

/// Everything produced by one orchestrated run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Devices the backend reported, or 0 if discovery failed.
    pub discovered: usize,
    pub runs: Vec<DeviceRun>,
}

impl RunSummary {
    /// Verdict and note per device, derived on demand.
    pub fn verdicts(&self, thresholds: &Thresholds) -> Vec<(DeviceIndex, Verdict, Option<String>)> {
        self.runs
            .iter()
            .map(|run| {
                let (verdict, note) = evaluate_with_note(&run.outcome, thresholds);
                (run.index, verdict, note)
            })
            .collect()
    }

    pub fn all_passed(&self, thresholds: &Thresholds) -> bool {
        self.verdicts(thresholds)
            .iter()
            .all(|(_, verdict, _)| *verdict == Verdict::Pass)
    }
}

enum Slot {
    Done(DeviceRun),
    Launched {
        index: DeviceIndex,
        name: String,
        handle: JoinHandle<Outcome>,
    },
}

pub struct Orchestrator<B, P> {
    backend: Arc<B>,
    probe: Arc<P>,
    settings: OrchestratorSettings,
}

impl<B: ComputeBackend, P: TelemetryProbe> Orchestrator<B, P> {
    pub fn new(backend: Arc<B>, probe: Arc<P>, settings: OrchestratorSettings) -> Self {
        Self {
            backend,
            probe,
            settings,
        }
    }

    /// Enumerate devices on a blocking thread.
    pub async fn discover(&self) -> Result<Vec<Device>, BackendError> {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || backend.devices())
            .await
            .map_err(|e| BackendError::Unavailable(format!("device discovery task failed: {e}")))?
    }

    /// Stress the selected devices for `duration` and collect one outcome
    /// per selected device.
    pub async fn run(&self, selection: &DeviceSelection, duration: Duration) -> RunSummary {
        let started_at = Utc::now();

        let discovered = match self.discover().await {
            Ok(devices) => {
                tracing::info!(
                    backend = self.backend.name(),
                    device_count = devices.len(),
                    "Device discovery complete",
                );
                Ok(devices)
            }
            Err(e) => {
                tracing::error!(backend = self.backend.name(), error = %e, "Device discovery failed");
                Err(e.to_string())
            }
        };

        let requested = match selection {
            DeviceSelection::All => discovered
                .as_ref()
                .map(|devices| devices.iter().map(|d| d.index).collect())
                .unwrap_or_default(),
            DeviceSelection::Indices(indices) => dedup_selection(indices),
        };

        let worker_settings = WorkerSettings {
            duration,
            max_iterations: self.settings.max_iterations,
        };
        let kernel = WorkloadKernel::new(Arc::clone(&self.backend), self.settings.memory_fraction);

        let slots: Vec<Slot> = requested
            .into_iter()
            .map(|index| match &discovered {
                Err(msg) => Slot::Done(DeviceRun {
                    index,
                    name: None,
                    outcome: Outcome::failure(
                        FailureKind::Unexpected,
                        format!("Unexpected error - device discovery failed: {msg}"),
                    ),
                }),
                Ok(devices) => match devices.iter().find(|d| d.index == index) {
                    None => {
                        let (kind, message) = match self.backend.unavailable_reason(index) {
                            Some(reason) => (
                                FailureKind::Unexpected,
                                format!(
                                    "Unexpected error - GPU index {index} could not be queried: {reason}"
                                ),
                            ),
                            None => (
                                FailureKind::InvalidDevice,
                                format!(
                                    "GPU index {index} is out of range. Available GPUs: {}",
                                    devices.len()
                                ),
                            ),
                        };
                        tracing::error!(gpu_index = index, "{message}");
                        Slot::Done(DeviceRun {
                            index,
                            name: None,
                            outcome: Outcome::failure(kind, message),
                        })
                    }
                    Some(device) => {
                        tracing::info!(
                            gpu_index = index,
                            name = %device.name,
                            total_memory_mb = device.total_memory_mb(),
                            "Testing GPU",
                        );
                        let worker = DeviceWorker::new(
                            device.clone(),
                            kernel.clone(),
                            Arc::clone(&self.probe),
                            worker_settings,
                        );
                        Slot::Launched {
                            index,
                            name: device.name.clone(),
                            handle: tokio::spawn(worker.run()),
                        }
                    }
                },
            })
            .collect();

        let deadline = tokio::time::Instant::now() + duration + self.settings.join_grace;
        let runs = join_all(slots.into_iter().map(|slot| join_slot(slot, deadline))).await;

        RunSummary {
            started_at,
            finished_at: Utc::now(),
            discovered: discovered.map(|d| d.len()).unwrap_or(0),
            runs,
        }
    }
}

/// Wait for a launched worker, converting panics and overruns into
/// `Unexpected` failures.
async fn join_slot(slot: Slot, deadline: tokio::time::Instant) -> DeviceRun {
    let (index, name, mut handle) = match slot {
        Slot::Done(run) => return run,
        Slot::Launched {
            index,
            name,
            handle,
        } => (index, name, handle),
    };

    let outcome = match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join)) => {
            let message = if join.is_panic() {
                panic_message(join.into_panic())
            } else {
                join.to_string()
            };
            tracing::error!(gpu_index = index, error = %message, "Worker terminated abnormally");
            Outcome::failure(
                FailureKind::Unexpected,
                format!("Unexpected error - {message}"),
            )
        }
        Err(_) => {
            handle.abort();
            tracing::error!(gpu_index = index, "Worker overran its join deadline");
            Outcome::failure(
                FailureKind::Unexpected,
                "Unexpected error - worker did not finish within the duration budget plus grace period",
            )
        }
    };

    DeviceRun {
        index,
        name: Some(name),
        outcome,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_from_str_and_string() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "worker panicked");
    }
}
