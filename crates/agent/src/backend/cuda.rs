//! CUDA compute backend.
//!
//! A and B are filled on the device by cuRAND, the product runs through
//! cuBLAS DGEMM into a third resident buffer, and an NVRTC-compiled kernel
//! reduces `sin(C) + cos(C)` to one partial sum per block. The partials are
//! summed on the host. Devices are enumerated through NVML, so ordinals
//! follow NVML order; set `CUDA_DEVICE_ORDER=PCI_BUS_ID` to keep CUDA in
//! step.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cudarc::cublas::sys::cublasOperation_t;
use cudarc::cublas::{CudaBlas, Gemm, GemmConfig};
use cudarc::curand::CudaRng;
use cudarc::driver::{
    sys, CudaDevice, CudaFunction, CudaSlice, DevicePtr, DriverError, LaunchAsync, LaunchConfig,
};
use nvml_wrapper::Nvml;

use burnin_core::device::{Device, DeviceIndex};

use super::{BackendError, ComputeBackend};
use crate::probe::nvml::enumerate_devices;

const MODULE: &str = "burnin";

const KERNELS: &str = r#"
extern "C" __global__ void sincos_reduce(const double *c, double *partials, const size_t n) {
    __shared__ double cache[256];
    const unsigned int tid = threadIdx.x;
    double acc = 0.0;
    for (size_t i = (size_t)blockIdx.x * blockDim.x + tid; i < n; i += (size_t)blockDim.x * gridDim.x) {
        const double v = c[i];
        acc += sin(v) + cos(v);
    }
    cache[tid] = acc;
    __syncthreads();
    for (unsigned int s = blockDim.x / 2; s > 0; s >>= 1) {
        if (tid < s) {
            cache[tid] += cache[tid + s];
        }
        __syncthreads();
    }
    if (tid == 0) {
        partials[blockIdx.x] = cache[0];
    }
}

extern "C" __global__ void to_signed_unit(double *x, const size_t n) {
    for (size_t i = (size_t)blockIdx.x * blockDim.x + threadIdx.x; i < n; i += (size_t)blockDim.x * gridDim.x) {
        x[i] = 1.0 - 2.0 * x[i];
    }
}
"#;

/// Threads per block; must match the shared cache size in `sincos_reduce`.
const BLOCK_SIZE: u32 = 256;
const REDUCE_BLOCKS: u32 = 1024;

/// Both kernels stride over the whole buffer, so a fixed grid covers any
/// length, including N² beyond `u32::MAX`.
const GRID_STRIDE: LaunchConfig = LaunchConfig {
    grid_dim: (REDUCE_BLOCKS, 1, 1),
    block_dim: (BLOCK_SIZE, 1, 1),
    shared_mem_bytes: 0,
};

pub struct CudaBackend {
    devices: Vec<Device>,
    unqueryable: BTreeMap<DeviceIndex, String>,
}

impl CudaBackend {
    /// Enumerate GPUs through NVML.
    pub fn new() -> Result<Self, BackendError> {
        let nvml = Nvml::init().map_err(|e| BackendError::Unavailable(format!("NVML: {e}")))?;
        let found = enumerate_devices(&nvml)
            .map_err(|e| BackendError::Unavailable(format!("NVML enumeration: {e}")))?;
        tracing::info!(
            gpu_count = found.devices.len(),
            unqueryable = found.unqueryable.len(),
            "CUDA backend ready",
        );
        Ok(Self {
            devices: found.devices,
            unqueryable: found.unqueryable,
        })
    }

    fn open(&self, device: &Device) -> Result<Arc<CudaDevice>, BackendError> {
        if !self.devices.iter().any(|d| d.index == device.index) {
            return Err(BackendError::UnknownDevice(device.index));
        }
        CudaDevice::new(device.index as usize).map_err(driver_error)
    }
}

pub struct CudaWorkload {
    dev: Arc<CudaDevice>,
    blas: CudaBlas,
    reduce: CudaFunction,
    dim: usize,
    a: CudaSlice<f64>,
    b: CudaSlice<f64>,
    c: CudaSlice<f64>,
    partials: CudaSlice<f64>,
}

fn driver_error(e: DriverError) -> BackendError {
    if e.0 == sys::CUresult::CUDA_ERROR_OUT_OF_MEMORY {
        BackendError::OutOfMemory(e.to_string())
    } else {
        BackendError::DeviceFault(e.to_string())
    }
}

fn load_kernels(dev: &Arc<CudaDevice>) -> Result<(), BackendError> {
    if dev.has_func(MODULE, "sincos_reduce") {
        return Ok(());
    }
    let ptx = cudarc::nvrtc::compile_ptx(KERNELS)
        .map_err(|e| BackendError::Unavailable(format!("kernel compilation: {e:?}")))?;
    dev.load_ptx(ptx, MODULE, &["sincos_reduce", "to_signed_unit"])
        .map_err(driver_error)
}

fn func(dev: &Arc<CudaDevice>, name: &str) -> Result<CudaFunction, BackendError> {
    dev.get_func(MODULE, name)
        .ok_or_else(|| BackendError::Unavailable(format!("kernel {name} not loaded")))
}

/// Allocate an N×N matrix of uniform values in [-1, 1).
fn random_matrix(
    dev: &Arc<CudaDevice>,
    rng: &CudaRng,
    len: usize,
) -> Result<CudaSlice<f64>, BackendError> {
    let mut m = dev.alloc_zeros::<f64>(len).map_err(driver_error)?;
    // cuRAND draws from (0, 1]; map to [-1, 1).
    rng.fill_with_uniform(&mut m)
        .map_err(|e| BackendError::DeviceFault(format!("cuRAND: {e:?}")))?;

    unsafe { func(dev, "to_signed_unit")?.launch(GRID_STRIDE, (&mut m, len)) }
        .map_err(driver_error)?;
    Ok(m)
}

impl ComputeBackend for CudaBackend {
    type Workload = CudaWorkload;

    // A, B and the product C.
    const RESIDENT_BUFFERS: u32 = 3;

    fn name(&self) -> &'static str {
        "cuda"
    }

    fn devices(&self) -> Result<Vec<Device>, BackendError> {
        Ok(self.devices.clone())
    }

    fn unavailable_reason(&self, index: DeviceIndex) -> Option<String> {
        self.unqueryable.get(&index).cloned()
    }

    fn allocate(&self, device: &Device, dim: usize) -> Result<CudaWorkload, BackendError> {
        let n = i32::try_from(dim)
            .map_err(|_| BackendError::OutOfMemory(format!("{dim}x{dim} exceeds cuBLAS limits")))?;
        let len = (n as usize) * (n as usize);

        let dev = self.open(device)?;
        load_kernels(&dev)?;

        let seed = rand::random::<u64>();
        let rng = CudaRng::new(seed, Arc::clone(&dev))
            .map_err(|e| BackendError::Unavailable(format!("cuRAND: {e:?}")))?;
        let a = random_matrix(&dev, &rng, len)?;
        let b = random_matrix(&dev, &rng, len)?;
        let c = dev.alloc_zeros::<f64>(len).map_err(driver_error)?;
        let partials = dev
            .alloc_zeros::<f64>(REDUCE_BLOCKS as usize)
            .map_err(driver_error)?;

        let blas = CudaBlas::new(Arc::clone(&dev))
            .map_err(|e| BackendError::Unavailable(format!("cuBLAS: {e:?}")))?;
        let reduce = func(&dev, "sincos_reduce")?;
        dev.synchronize().map_err(driver_error)?;

        Ok(CudaWorkload {
            dev,
            blas,
            reduce,
            dim,
            a,
            b,
            c,
            partials,
        })
    }

    fn saturation_step(&self, w: &mut CudaWorkload) -> Result<f64, BackendError> {
        let n = w.dim as i32;
        let len = w.dim * w.dim;

        // Column-major GEMM; the product is B·A in row-major terms, which
        // does the same work.
        let cfg = GemmConfig {
            transa: cublasOperation_t::CUBLAS_OP_N,
            transb: cublasOperation_t::CUBLAS_OP_N,
            m: n,
            n,
            k: n,
            alpha: 1.0f64,
            lda: n,
            ldb: n,
            beta: 0.0f64,
            ldc: n,
        };
        unsafe { w.blas.gemm(cfg, &w.a, &w.b, &mut w.c) }
            .map_err(|e| BackendError::DeviceFault(format!("cuBLAS DGEMM: {e:?}")))?;

        unsafe { w.reduce.clone().launch(GRID_STRIDE, (&w.c, &mut w.partials, len)) }
            .map_err(driver_error)?;

        let partials = w.dev.dtoh_sync_copy(&w.partials).map_err(driver_error)?;
        Ok(partials.iter().sum())
    }

    fn synchronize(&self, w: &CudaWorkload) -> Result<(), BackendError> {
        w.dev.synchronize().map_err(driver_error)
    }

    fn peer_transfer(
        &self,
        src: &Device,
        dst: &Device,
        bytes: u64,
    ) -> Result<Duration, BackendError> {
        let len = usize::try_from(bytes)
            .map_err(|_| BackendError::OutOfMemory(format!("{bytes} bytes")))?;

        let src_dev = self.open(src)?;
        let dst_dev = self.open(dst)?;
        let source = src_dev.alloc_zeros::<u8>(len).map_err(driver_error)?;
        let target = dst_dev.alloc_zeros::<u8>(len).map_err(driver_error)?;
        src_dev.synchronize().map_err(driver_error)?;
        dst_dev.synchronize().map_err(driver_error)?;

        let start = Instant::now();
        // Unified addressing lets a plain device-to-device copy cross GPUs.
        unsafe {
            cudarc::driver::result::memcpy_dtod_sync(*target.device_ptr(), *source.device_ptr(), len)
        }
        .map_err(driver_error)?;
        dst_dev.synchronize().map_err(driver_error)?;
        Ok(start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Without drivers construction fails cleanly; with a GPU the fill lands
    /// in [-1, 1) and one short step runs on device 0.
    #[test]
    fn runs_a_small_step_when_available() {
        let backend = match CudaBackend::new() {
            Ok(backend) => backend,
            Err(e) => {
                assert!(matches!(e, BackendError::Unavailable(_)));
                return;
            }
        };
        let Some(device) = backend.devices().unwrap().into_iter().next() else {
            return;
        };

        let mut workload = backend.allocate(&device, 256).expect("allocate");
        let a = workload.dev.dtoh_sync_copy(&workload.a).expect("copy A");
        assert_eq!(a.len(), 256 * 256);
        assert!(a.iter().all(|x| (-1.0..1.0).contains(x)));
        assert!(a.iter().any(|x| *x < 0.0));

        let value = backend.saturation_step(&mut workload).expect("step");
        backend.synchronize(&workload).expect("synchronize");
        assert!(value.is_finite());
    }
}
