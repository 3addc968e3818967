//! Point-to-point transfer test.
//!
//! Copies a payload between every ordered pair of devices, one pair at a
//! time so links are measured without contention. A failing pair is
//! recorded and the remaining pairs still run. While the test runs, an
//! optional [`TopologyLogger`] appends `nvidia-smi topo -m` snapshots to a
//! log file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use burnin_core::device::Device;
use burnin_core::transfer::{
    ordered_pairs, slow_links, transfer_speed_gbps, PairResult, BYTES_PER_GIB,
    LOW_TRANSFER_SPEED_GBPS,
};

use crate::backend::{BackendError, ComputeBackend};
use crate::probe::smi::query_topology;

/// Default topology snapshot interval.
pub const DEFAULT_TOPOLOGY_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("transfer test needs at least 2 devices, found {0}")]
    NotEnoughDevices(usize),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub payload_bytes: u64,
    pub slow_threshold_gbps: f64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            payload_bytes: BYTES_PER_GIB,
            slow_threshold_gbps: LOW_TRANSFER_SPEED_GBPS,
        }
    }
}

/// Measure every ordered device pair. Pair results are in src-major order.
pub async fn run_transfer_test<B: ComputeBackend>(
    backend: Arc<B>,
    settings: &TransferSettings,
) -> Result<Vec<PairResult>, TransferError> {
    let devices = {
        let backend = Arc::clone(&backend);
        tokio::task::spawn_blocking(move || backend.devices())
            .await
            .map_err(|e| BackendError::Unavailable(format!("device discovery task failed: {e}")))??
    };

    if devices.len() < 2 {
        return Err(TransferError::NotEnoughDevices(devices.len()));
    }

    tracing::info!(
        device_count = devices.len(),
        payload_bytes = settings.payload_bytes,
        "Starting transfer test",
    );

    let mut results = Vec::new();
    for (src_pos, dst_pos) in ordered_pairs(devices.len() as u32) {
        let src = devices[src_pos as usize].clone();
        let dst = devices[dst_pos as usize].clone();
        let result = measure_pair(Arc::clone(&backend), src, dst, settings.payload_bytes).await;

        match &result.speed_gbps {
            Ok(speed) => tracing::info!(
                src = result.src,
                dst = result.dst,
                speed_gbps = %format!("{speed:.2}"),
                "Transfer complete",
            ),
            Err(e) => tracing::error!(src = result.src, dst = result.dst, error = %e, "Transfer failed"),
        }
        results.push(result);
    }

    for slow in slow_links(&results, settings.slow_threshold_gbps) {
        tracing::warn!(
            src = slow.src,
            dst = slow.dst,
            speed_gbps = ?slow.speed_gbps,
            threshold_gbps = settings.slow_threshold_gbps,
            "Low transfer speed between GPUs",
        );
    }

    Ok(results)
}

async fn measure_pair<B: ComputeBackend>(
    backend: Arc<B>,
    src: Device,
    dst: Device,
    bytes: u64,
) -> PairResult {
    let (src_index, dst_index) = (src.index, dst.index);
    let elapsed = tokio::task::spawn_blocking(move || backend.peer_transfer(&src, &dst, bytes)).await;

    let speed_gbps = match elapsed {
        Ok(Ok(elapsed)) => transfer_speed_gbps(bytes, elapsed)
            .ok_or_else(|| "transfer completed in zero time".to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(join) => Err(format!("transfer task failed: {join}")),
    };

    PairResult {
        src: src_index,
        dst: dst_index,
        speed_gbps,
    }
}

/// Background task appending topology snapshots to a log file.
pub struct TopologyLogger {
    program: PathBuf,
    log_path: PathBuf,
    interval: Duration,
    timeout: Duration,
}

impl TopologyLogger {
    pub fn new(
        program: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            log_path: log_path.into(),
            interval,
            timeout,
        }
    }

    /// Take a snapshot immediately and then every interval until `cancel`
    /// fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(path = %self.log_path.display(), "Topology logger started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.snapshot().await {
                        tracing::warn!(error = %e, "Topology snapshot failed");
                    }
                }
            }
        }

        tracing::info!("Topology logger stopped");
    }

    async fn snapshot(&self) -> anyhow::Result<()> {
        let topology = query_topology(&self.program, self.timeout).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        let header = format!(
            "\n\n--- Topology at {} ---\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        file.write_all(header.as_bytes()).await?;
        file.write_all(topology.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
