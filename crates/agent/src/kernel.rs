//! The synthetic saturation workload.
//!
//! [`WorkloadKernel`] sizes the two resident matrices from the device's
//! memory, allocates them through the backend, and runs one saturation step
//! at a time, each ending in a device barrier so the caller's wall-clock
//! timing covers the full step. There is no retry with a smaller size on
//! allocation failure.

use std::fmt;
use std::sync::Arc;

use burnin_core::device::Device;
use burnin_core::workload::{matrix_bytes, matrix_dimension};

use crate::backend::{BackendError, ComputeBackend};

/// Two resident matrices on one device, owned by exactly one worker.
/// Dropping it releases the device memory.
pub struct WorkloadState<B: ComputeBackend> {
    pub device: Device,
    pub dim: usize,
    workload: B::Workload,
}

impl<B: ComputeBackend> fmt::Debug for WorkloadState<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadState")
            .field("device", &self.device.index)
            .field("dim", &self.dim)
            .finish_non_exhaustive()
    }
}

pub struct WorkloadKernel<B> {
    backend: Arc<B>,
    memory_fraction: f64,
}

impl<B> Clone for WorkloadKernel<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            memory_fraction: self.memory_fraction,
        }
    }
}

impl<B: ComputeBackend> WorkloadKernel<B> {
    pub fn new(backend: Arc<B>, memory_fraction: f64) -> Self {
        Self {
            backend,
            memory_fraction,
        }
    }

    /// Matrix dimension this kernel would use on `device`.
    pub fn dimension_for(&self, device: &Device) -> usize {
        matrix_dimension(
            device.total_memory_bytes,
            self.memory_fraction,
            B::RESIDENT_BUFFERS,
        )
    }

    /// Size and allocate the workload. Blocking.
    pub fn allocate(&self, device: &Device) -> Result<WorkloadState<B>, BackendError> {
        let dim = self.dimension_for(device);
        if dim == 0 {
            return Err(BackendError::OutOfMemory(format!(
                "device {} has too little memory ({} bytes) for any workload",
                device.index, device.total_memory_bytes
            )));
        }

        tracing::info!(
            gpu_index = device.index,
            dim,
            bytes_per_matrix = matrix_bytes(dim),
            "Creating tensors of size {dim}x{dim}",
        );

        let workload = self.backend.allocate(device, dim)?;
        Ok(WorkloadState {
            device: device.clone(),
            dim,
            workload,
        })
    }

    /// Run one saturation step and wait for the device. Blocking.
    ///
    /// A non-finite reduction means the device produced garbage and is
    /// reported as a fault.
    pub fn step(&self, state: &mut WorkloadState<B>) -> Result<f64, BackendError> {
        let value = self.backend.saturation_step(&mut state.workload)?;
        self.backend.synchronize(&state.workload)?;
        if !value.is_finite() {
            return Err(BackendError::DeviceFault(format!(
                "saturation step on device {} produced a non-finite result ({value})",
                state.device.index
            )));
        }
        Ok(value)
    }
}
