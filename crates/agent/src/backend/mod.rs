//! Compute backend boundary.
//!
//! The harness never implements dense linear algebra itself. A
//! [`ComputeBackend`] enumerates devices, allocates the resident workload on
//! one of them, runs the fused saturation primitive and provides a barrier
//! that waits for the device to finish. Out-of-memory and device faults are
//! distinct [`BackendError`] kinds so workers can classify failures.

use std::time::Duration;

use burnin_core::device::{Device, DeviceIndex};

pub mod host;

#[cfg(feature = "cuda")]
pub mod cuda;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("device fault: {0}")]
    DeviceFault(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("device {0} is not managed by this backend")]
    UnknownDevice(u32),
}

/// Everything the harness needs from an accelerator runtime.
///
/// Implementations are shared across all device workers behind an `Arc`
/// and called from blocking threads, one device per thread.
pub trait ComputeBackend: Send + Sync + 'static {
    /// Buffers resident on the device for one workload: the two random
    /// matrices plus any scratch space the step needs.
    type Workload: Send + 'static;

    /// Number of N×N `f64` buffers a workload keeps resident. Used to size
    /// N so the whole workload fits the requested memory fraction.
    const RESIDENT_BUFFERS: u32;

    /// Short identifier for logs.
    fn name(&self) -> &'static str;

    /// Enumerate devices, ordered by index.
    fn devices(&self) -> Result<Vec<Device>, BackendError>;

    /// Why an index the driver reports was left out of
    /// [`ComputeBackend::devices`], if it was.
    fn unavailable_reason(&self, _index: DeviceIndex) -> Option<String> {
        None
    }

    /// Allocate two N×N matrices filled with independent random values on
    /// `device`.
    fn allocate(&self, device: &Device, dim: usize) -> Result<Self::Workload, BackendError>;

    /// Run C = A·B, D = sin(C) + cos(C), R = sum(D) and return R. May return
    /// before the device has finished; see [`ComputeBackend::synchronize`].
    fn saturation_step(&self, workload: &mut Self::Workload) -> Result<f64, BackendError>;

    /// Block until all work queued for the workload's device has completed.
    fn synchronize(&self, workload: &Self::Workload) -> Result<(), BackendError>;

    /// Copy `bytes` from `src` to `dst` and return how long the copy took,
    /// barrier included.
    fn peer_transfer(&self, src: &Device, dst: &Device, bytes: u64)
        -> Result<Duration, BackendError>;
}
