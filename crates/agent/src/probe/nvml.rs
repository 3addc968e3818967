//! NVML-based telemetry probe and device enumeration.
//!
//! In-process alternative to `nvidia-smi`: reads memory info and core
//! temperature straight from the NVIDIA Management Library. NVML calls block,
//! so each sample runs on a blocking thread under the same timeout as the
//! external query.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;

use burnin_core::device::{Device, DeviceIndex, BYTES_PER_MB};
use burnin_core::telemetry::TelemetrySample;

use super::{ProbeError, TelemetryProbe};

pub struct NvmlProbe {
    nvml: Arc<Nvml>,
    timeout: Duration,
}

impl NvmlProbe {
    /// Initialise NVML. Fails on hosts without NVIDIA drivers.
    pub fn init(timeout: Duration) -> Result<Self, ProbeError> {
        let nvml = Nvml::init().map_err(|e| ProbeError::Nvml(e.to_string()))?;
        tracing::info!("NVML initialised successfully");
        Ok(Self {
            nvml: Arc::new(nvml),
            timeout,
        })
    }
}

impl TelemetryProbe for NvmlProbe {
    async fn sample(&self, index: DeviceIndex) -> Result<TelemetrySample, ProbeError> {
        let nvml = Arc::clone(&self.nvml);
        let start = Instant::now();
        let task = tokio::task::spawn_blocking(move || read_device(&nvml, index));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result.map_err(|e| ProbeError::Nvml(e.to_string())),
            Ok(Err(join)) => Err(ProbeError::Nvml(format!("query task failed: {join}"))),
            Err(_) => Err(ProbeError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
        }
    }
}

/// Read one device's memory and temperature.
fn read_device(nvml: &Nvml, index: DeviceIndex) -> Result<TelemetrySample, NvmlError> {
    let device = nvml.device_by_index(index)?;
    let mem_info = device.memory_info()?;
    let temperature = device.temperature(TemperatureSensor::Gpu)?;

    Ok(TelemetrySample {
        total_memory_mb: mem_info.total / BYTES_PER_MB,
        used_memory_mb: mem_info.used / BYTES_PER_MB,
        temperature_c: temperature,
    })
}

/// GPUs NVML reports, split into usable devices and indices whose query
/// failed.
#[derive(Debug, Default)]
pub struct Enumeration {
    pub devices: Vec<Device>,
    pub unqueryable: BTreeMap<DeviceIndex, String>,
}

/// Enumerate every GPU NVML can see.
///
/// A device that fails to report does not fail the whole enumeration; its
/// index is kept in [`Enumeration::unqueryable`] with the NVML error.
pub fn enumerate_devices(nvml: &Nvml) -> Result<Enumeration, NvmlError> {
    let count = nvml.device_count()?;
    let mut found = Enumeration {
        devices: Vec::with_capacity(count as usize),
        unqueryable: BTreeMap::new(),
    };

    for idx in 0..count {
        let info = nvml
            .device_by_index(idx)
            .and_then(|d| Ok((d.name()?, d.memory_info()?.total)));
        match info {
            Ok((name, total)) => found.devices.push(Device::new(idx, name, total)),
            Err(e) => {
                tracing::warn!(gpu_index = idx, error = %e, "Skipping GPU -- NVML query failed");
                found.unqueryable.insert(idx, format!("NVML query failed: {e}"));
            }
        }
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// On a machine without NVIDIA drivers (typical CI) initialisation
    /// fails cleanly; on a GPU host every enumerated device is sampled.
    #[tokio::test]
    async fn init_is_graceful_without_drivers() {
        let probe = match NvmlProbe::init(Duration::from_secs(5)) {
            Ok(probe) => probe,
            Err(e) => {
                assert!(matches!(e, ProbeError::Nvml(_)));
                return;
            }
        };

        let found = enumerate_devices(&probe.nvml).expect("enumerate");
        for device in found.devices {
            let sample = probe.sample(device.index).await.expect("sample");
            assert!(sample.used_memory_mb <= sample.total_memory_mb);
        }
    }
}
