//! CPU compute backend.
//!
//! Presents the host as one or more virtual devices, each with its own
//! rayon thread pool and a fixed memory budget. Allocations are leased
//! against that budget so an oversized workload fails with
//! [`BackendError::OutOfMemory`] the same way a GPU allocation would.
//! Useful for smoke-testing the harness on machines without accelerators.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use burnin_core::device::Device;

use super::{BackendError, ComputeBackend};

struct HostDevice {
    info: Device,
    pool: Arc<ThreadPool>,
    allocated: Arc<AtomicU64>,
}

pub struct HostBackend {
    devices: Vec<HostDevice>,
}

impl HostBackend {
    /// Create `device_count` virtual devices of `memory_bytes` each, splitting
    /// the available CPU threads evenly between them.
    pub fn new(device_count: u32, memory_bytes: u64) -> Result<Self, BackendError> {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let threads = (cpus / device_count.max(1) as usize).max(1);

        let mut devices = Vec::with_capacity(device_count as usize);
        for index in 0..device_count {
            let pool = ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(move |t| format!("burnin-host{index}-{t}"))
                .build()
                .map_err(|e| BackendError::Unavailable(format!("thread pool: {e}")))?;
            devices.push(HostDevice {
                info: Device::new(index, format!("Host CPU ({threads} threads)"), memory_bytes),
                pool: Arc::new(pool),
                allocated: Arc::new(AtomicU64::new(0)),
            });
        }

        tracing::info!(device_count, threads_per_device = threads, memory_bytes, "Host backend ready");
        Ok(Self { devices })
    }

    fn device(&self, device: &Device) -> Result<&HostDevice, BackendError> {
        self.devices
            .get(device.index as usize)
            .ok_or(BackendError::UnknownDevice(device.index))
    }

    /// Bytes currently leased on a device.
    pub fn allocated_bytes(&self, index: u32) -> u64 {
        self.devices
            .get(index as usize)
            .map(|d| d.allocated.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

/// Reservation against a virtual device's memory budget, returned on drop.
struct MemoryLease {
    bytes: u64,
    allocated: Arc<AtomicU64>,
}

impl MemoryLease {
    fn acquire(device: &HostDevice, bytes: u64) -> Result<Self, BackendError> {
        let limit = device.info.total_memory_bytes;
        device
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(bytes).filter(|next| *next <= limit)
            })
            .map_err(|current| {
                BackendError::OutOfMemory(format!(
                    "tried to allocate {bytes} bytes on device {} with {} of {limit} bytes in use",
                    device.info.index, current
                ))
            })?;
        Ok(Self {
            bytes,
            allocated: Arc::clone(&device.allocated),
        })
    }
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        self.allocated.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

struct HostMatrix {
    data: Vec<f64>,
    _lease: MemoryLease,
}

pub struct HostWorkload {
    dim: usize,
    a: HostMatrix,
    b: HostMatrix,
    pool: Arc<ThreadPool>,
}

impl fmt::Debug for HostWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostWorkload")
            .field("dim", &self.dim)
            .finish_non_exhaustive()
    }
}

fn random_matrix(device: &HostDevice, dim: usize) -> Result<HostMatrix, BackendError> {
    let len = dim
        .checked_mul(dim)
        .ok_or_else(|| BackendError::OutOfMemory(format!("{dim}x{dim} overflows")))?;
    let lease = MemoryLease::acquire(device, (len as u64) * 8)?;

    let mut data: Vec<f64> = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|e| BackendError::OutOfMemory(format!("{dim}x{dim} f64 matrix: {e}")))?;
    data.resize(len, 0.0);

    device.pool.install(|| {
        data.par_chunks_mut(dim.max(1)).for_each_init(rand::rng, |rng, row| {
            for x in row {
                *x = rng.random_range(-1.0..1.0);
            }
        });
    });

    Ok(HostMatrix {
        data,
        _lease: lease,
    })
}

impl ComputeBackend for HostBackend {
    type Workload = HostWorkload;

    // The product is fused row by row into the reduction, so only A and B
    // stay resident.
    const RESIDENT_BUFFERS: u32 = 2;

    fn name(&self) -> &'static str {
        "host"
    }

    fn devices(&self) -> Result<Vec<Device>, BackendError> {
        Ok(self.devices.iter().map(|d| d.info.clone()).collect())
    }

    fn allocate(&self, device: &Device, dim: usize) -> Result<HostWorkload, BackendError> {
        let host = self.device(device)?;
        let a = random_matrix(host, dim)?;
        let b = random_matrix(host, dim)?;
        Ok(HostWorkload {
            dim,
            a,
            b,
            pool: Arc::clone(&host.pool),
        })
    }

    fn saturation_step(&self, workload: &mut HostWorkload) -> Result<f64, BackendError> {
        let n = workload.dim;
        if n == 0 {
            return Ok(0.0);
        }
        let a = &workload.a.data;
        let b = &workload.b.data;

        let sum = workload.pool.install(|| {
            a.par_chunks(n)
                .map_init(
                    || vec![0.0f64; n],
                    |c_row, a_row| {
                        c_row.fill(0.0);
                        for (k, a_ik) in a_row.iter().enumerate() {
                            let b_row = &b[k * n..(k + 1) * n];
                            for (c, b_kj) in c_row.iter_mut().zip(b_row) {
                                *c += a_ik * b_kj;
                            }
                        }
                        c_row.iter().map(|c| c.sin() + c.cos()).sum::<f64>()
                    },
                )
                .sum::<f64>()
        });

        Ok(sum)
    }

    fn synchronize(&self, _workload: &HostWorkload) -> Result<(), BackendError> {
        // Host steps complete before `saturation_step` returns.
        Ok(())
    }

    fn peer_transfer(
        &self,
        src: &Device,
        dst: &Device,
        bytes: u64,
    ) -> Result<Duration, BackendError> {
        let src_dev = self.device(src)?;
        let dst_dev = self.device(dst)?;
        let len = usize::try_from(bytes)
            .map_err(|_| BackendError::OutOfMemory(format!("{bytes} bytes")))?;

        let _src_lease = MemoryLease::acquire(src_dev, bytes)?;
        let _dst_lease = MemoryLease::acquire(dst_dev, bytes)?;

        let mut source: Vec<u8> = Vec::new();
        source
            .try_reserve_exact(len)
            .map_err(|e| BackendError::OutOfMemory(e.to_string()))?;
        source.resize(len, 0);
        rand::rng().fill(&mut source[..]);

        let mut target: Vec<u8> = Vec::new();
        target
            .try_reserve_exact(len)
            .map_err(|e| BackendError::OutOfMemory(e.to_string()))?;
        target.resize(len, 0);

        let start = Instant::now();
        target.copy_from_slice(&source);
        let elapsed = start.elapsed();

        if target.first() != source.first() || target.last() != source.last() {
            return Err(BackendError::DeviceFault("copy verification failed".to_string()));
        }
        Ok(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn enumerates_requested_devices() {
        let backend = HostBackend::new(3, 64 * MB).unwrap();
        let devices = backend.devices().unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices.iter().map(|d| d.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(devices.iter().all(|d| d.total_memory_bytes == 64 * MB));
    }

    #[test]
    fn step_matches_naive_computation() {
        let backend = HostBackend::new(1, 64 * MB).unwrap();
        let device = backend.devices().unwrap().remove(0);
        let mut workload = backend.allocate(&device, 8).unwrap();

        let n = 8;
        let (a, b) = (&workload.a.data, &workload.b.data);
        let mut expected = 0.0;
        for i in 0..n {
            for j in 0..n {
                let c: f64 = (0..n).map(|k| a[i * n + k] * b[k * n + j]).sum();
                expected += c.sin() + c.cos();
            }
        }

        let got = backend.saturation_step(&mut workload).unwrap();
        assert!((got - expected).abs() < 1e-9, "got {got}, expected {expected}");
        backend.synchronize(&workload).unwrap();
    }

    #[test]
    fn random_values_are_in_unit_range() {
        let backend = HostBackend::new(1, 64 * MB).unwrap();
        let device = backend.devices().unwrap().remove(0);
        let workload = backend.allocate(&device, 32).unwrap();
        assert!(workload.a.data.iter().all(|x| (-1.0..1.0).contains(x)));
        assert_ne!(workload.a.data, workload.b.data);
    }

    #[test]
    fn oversized_allocation_is_out_of_memory() {
        let backend = HostBackend::new(1, MB).unwrap();
        let device = backend.devices().unwrap().remove(0);
        // 512x512 f64 = 2 MiB per matrix.
        assert_matches!(backend.allocate(&device, 512), Err(BackendError::OutOfMemory(_)));
        assert_eq!(backend.allocated_bytes(0), 0);
    }

    #[test]
    fn second_matrix_failure_releases_the_first() {
        let backend = HostBackend::new(1, 3 * MB).unwrap();
        let device = backend.devices().unwrap().remove(0);
        // Each matrix is 2 MiB; A fits, B does not.
        assert_matches!(backend.allocate(&device, 512), Err(BackendError::OutOfMemory(_)));
        assert_eq!(backend.allocated_bytes(0), 0);
    }

    #[test]
    fn dropping_workload_returns_memory() {
        let backend = HostBackend::new(1, 8 * MB).unwrap();
        let device = backend.devices().unwrap().remove(0);
        let workload = backend.allocate(&device, 256).unwrap();
        assert_eq!(backend.allocated_bytes(0), 2 * 256 * 256 * 8);
        assert_eq!(format!("{workload:?}"), "HostWorkload { dim: 256, .. }");
        drop(workload);
        assert_eq!(backend.allocated_bytes(0), 0);
    }

    #[test]
    fn unknown_device_is_rejected() {
        let backend = HostBackend::new(1, MB).unwrap();
        let ghost = Device::new(4, "ghost", MB);
        assert_matches!(backend.allocate(&ghost, 4), Err(BackendError::UnknownDevice(4)));
    }

    #[test]
    fn peer_transfer_between_virtual_devices() {
        let backend = HostBackend::new(2, 8 * MB).unwrap();
        let devices = backend.devices().unwrap();
        let elapsed = backend.peer_transfer(&devices[0], &devices[1], MB).unwrap();
        assert!(elapsed < Duration::from_secs(5));
        assert_eq!(backend.allocated_bytes(0), 0);
        assert_eq!(backend.allocated_bytes(1), 0);
    }
}
