//! Device telemetry probes.
//!
//! A probe answers one question: what are this device's total memory, used
//! memory and temperature right now. Every call is independent and bounded
//! by a timeout so a hung query cannot stall a stress loop.

use std::future::Future;

use burnin_core::device::DeviceIndex;
use burnin_core::error::CoreError;
use burnin_core::telemetry::TelemetrySample;

pub mod nvml;
pub mod smi;

pub use nvml::NvmlProbe;
pub use smi::NvidiaSmiProbe;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("telemetry query timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("telemetry query exited with code {code}: {stderr}")]
    ExitStatus { code: i32, stderr: String },

    #[error(transparent)]
    Parse(#[from] CoreError),

    #[error("NVML: {0}")]
    Nvml(String),
}

/// Source of per-device telemetry.
pub trait TelemetryProbe: Send + Sync + 'static {
    fn sample(
        &self,
        index: DeviceIndex,
    ) -> impl Future<Output = Result<TelemetrySample, ProbeError>> + Send;
}

/// Probe chosen at runtime from configuration.
pub enum AnyProbe {
    Smi(NvidiaSmiProbe),
    Nvml(NvmlProbe),
}

impl TelemetryProbe for AnyProbe {
    async fn sample(&self, index: DeviceIndex) -> Result<TelemetrySample, ProbeError> {
        match self {
            Self::Smi(probe) => probe.sample(index).await,
            Self::Nvml(probe) => probe.sample(index).await,
        }
    }
}
