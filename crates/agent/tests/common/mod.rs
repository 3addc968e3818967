//! Shared fixtures for agent integration tests: a scripted compute backend
//! with per-device fault injection and a probe that always reports the same
//! sample.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use burnin_agent::backend::{BackendError, ComputeBackend};
use burnin_agent::probe::{ProbeError, TelemetryProbe};
use burnin_core::device::Device;
use burnin_core::telemetry::TelemetrySample;

pub const MB: u64 = 1024 * 1024;

/// Wall time each scripted step takes.
pub const STEP_TIME: Duration = Duration::from_millis(5);

/// What goes wrong on a scripted device.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Allocation fails with out-of-memory.
    OutOfMemory,
    /// Steps after the first `after` fail with a device fault.
    StepFault { after: u64 },
    /// The first step panics.
    Panic,
    /// The first step blocks for this long.
    Hang(Duration),
}

pub struct MockBackend {
    devices: Vec<Device>,
    faults: HashMap<u32, Fault>,
    unqueryable: HashMap<u32, String>,
    discovery_fails: bool,
}

impl MockBackend {
    /// `count` healthy devices with 64 MiB each.
    pub fn new(count: u32) -> Self {
        Self {
            devices: (0..count)
                .map(|i| Device::new(i, format!("Mock GPU {i}"), 64 * MB))
                .collect(),
            faults: HashMap::new(),
            unqueryable: HashMap::new(),
            discovery_fails: false,
        }
    }

    pub fn with_fault(mut self, index: u32, fault: Fault) -> Self {
        self.faults.insert(index, fault);
        self
    }

    /// Drop `index` from discovery, as a driver does when the device fails
    /// to report.
    pub fn with_unqueryable(mut self, index: u32, reason: &str) -> Self {
        self.devices.retain(|d| d.index != index);
        self.unqueryable.insert(index, reason.to_string());
        self
    }

    pub fn failing_discovery() -> Self {
        Self {
            devices: Vec::new(),
            faults: HashMap::new(),
            unqueryable: HashMap::new(),
            discovery_fails: true,
        }
    }
}

pub struct MockWorkload {
    index: u32,
    steps: u64,
    fault: Option<Fault>,
}

impl ComputeBackend for MockBackend {
    type Workload = MockWorkload;
    const RESIDENT_BUFFERS: u32 = 2;

    fn name(&self) -> &'static str {
        "mock"
    }

    fn devices(&self) -> Result<Vec<Device>, BackendError> {
        if self.discovery_fails {
            return Err(BackendError::Unavailable("driver not loaded".to_string()));
        }
        Ok(self.devices.clone())
    }

    fn unavailable_reason(&self, index: u32) -> Option<String> {
        self.unqueryable.get(&index).cloned()
    }

    fn allocate(&self, device: &Device, _dim: usize) -> Result<MockWorkload, BackendError> {
        let fault = self.faults.get(&device.index).copied();
        if let Some(Fault::OutOfMemory) = fault {
            return Err(BackendError::OutOfMemory("CUDA out of memory".to_string()));
        }
        Ok(MockWorkload {
            index: device.index,
            steps: 0,
            fault,
        })
    }

    fn saturation_step(&self, workload: &mut MockWorkload) -> Result<f64, BackendError> {
        match workload.fault {
            Some(Fault::StepFault { after }) if workload.steps >= after => {
                return Err(BackendError::DeviceFault(format!(
                    "illegal memory access on device {}",
                    workload.index
                )));
            }
            Some(Fault::Panic) => panic!("simulated driver crash"),
            Some(Fault::Hang(time)) => std::thread::sleep(time),
            _ => {}
        }
        std::thread::sleep(STEP_TIME);
        workload.steps += 1;
        Ok(workload.steps as f64)
    }

    fn synchronize(&self, _workload: &MockWorkload) -> Result<(), BackendError> {
        Ok(())
    }

    fn peer_transfer(
        &self,
        _src: &Device,
        _dst: &Device,
        _bytes: u64,
    ) -> Result<Duration, BackendError> {
        let start = Instant::now();
        std::thread::sleep(STEP_TIME);
        Ok(start.elapsed())
    }
}

/// Reports the same sample for every device.
pub struct FixedProbe(pub TelemetrySample);

impl FixedProbe {
    /// 1000 MB total, 800 MB used, 60 °C.
    pub fn healthy() -> Self {
        Self(TelemetrySample {
            total_memory_mb: 1000,
            used_memory_mb: 800,
            temperature_c: 60,
        })
    }
}

impl TelemetryProbe for FixedProbe {
    async fn sample(&self, _index: u32) -> Result<TelemetrySample, ProbeError> {
        Ok(self.0)
    }
}
