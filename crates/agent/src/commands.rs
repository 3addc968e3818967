//! Command flows behind the `burnin-agent` subcommands.
//!
//! Each flow picks the configured compute backend, runs the test and logs
//! a summary. The binary maps the results to an exit code.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use burnin_core::device::{DeviceIndex, BYTES_PER_MB};
use burnin_core::report::tally;
use burnin_core::transfer::{PairResult, BYTES_PER_GIB};
use burnin_core::verdict::{Profile, Thresholds};

use crate::backend::host::HostBackend;
use crate::backend::ComputeBackend;
use crate::config::{AgentConfig, BackendKind, TelemetryKind};
use crate::io_bench::{run_io_bench, IoBenchResult, IoBenchSettings};
use crate::orchestrator::{DeviceSelection, Orchestrator, OrchestratorSettings, RunSummary};
use crate::probe::{AnyProbe, NvidiaSmiProbe, NvmlProbe};
use crate::report::{hostname, ReportWriter, WrittenReport};
use crate::transfer::{
    run_transfer_test, TopologyLogger, TransferSettings, DEFAULT_TOPOLOGY_INTERVAL,
};

/// Command-line overrides for a stress run.
#[derive(Debug, Clone, Default)]
pub struct StressOptions {
    /// Empty means every discovered device.
    pub gpus: Vec<DeviceIndex>,
    pub duration: Option<Duration>,
    pub profile: Option<Profile>,
    pub max_iterations: Option<u64>,
}

#[derive(Debug)]
pub struct StressReport {
    pub profile: Profile,
    pub thresholds: Thresholds,
    pub summary: RunSummary,
    pub written: WrittenReport,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    pub size_gb: Option<f64>,
    pub topology_log: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct IoBenchOptions {
    pub size_mb: usize,
    pub operations: u32,
    pub dir: Option<PathBuf>,
}

/// Build the configured telemetry probe.
pub fn build_probe(config: &AgentConfig) -> anyhow::Result<AnyProbe> {
    Ok(match config.telemetry {
        TelemetryKind::Smi => {
            AnyProbe::Smi(NvidiaSmiProbe::new(&config.smi_program, config.probe_timeout))
        }
        TelemetryKind::Nvml => AnyProbe::Nvml(
            NvmlProbe::init(config.probe_timeout).context("failed to initialise NVML telemetry")?,
        ),
    })
}

fn host_backend(config: &AgentConfig) -> anyhow::Result<HostBackend> {
    HostBackend::new(config.host_devices, config.host_memory_mb * BYTES_PER_MB)
        .context("failed to create host backend")
}

#[cfg(feature = "cuda")]
fn cuda_backend() -> anyhow::Result<crate::backend::cuda::CudaBackend> {
    crate::backend::cuda::CudaBackend::new().context("failed to initialise CUDA backend")
}

#[cfg(not(feature = "cuda"))]
fn cuda_unavailable() -> anyhow::Error {
    anyhow::anyhow!("BURNIN_BACKEND=cuda but this binary was built without the `cuda` feature")
}

// ---------------------------------------------------------------------------
// Stress
// ---------------------------------------------------------------------------

/// Run the stress test and write the report.
pub async fn stress(config: &AgentConfig, options: &StressOptions) -> anyhow::Result<StressReport> {
    let mut config = config.clone();
    if let Some(profile) = options.profile {
        config.profile = profile;
    }

    match config.backend {
        BackendKind::Host => stress_with(Arc::new(host_backend(&config)?), &config, options).await,
        #[cfg(feature = "cuda")]
        BackendKind::Cuda => stress_with(Arc::new(cuda_backend()?), &config, options).await,
        #[cfg(not(feature = "cuda"))]
        BackendKind::Cuda => Err(cuda_unavailable()),
    }
}

/// Stress flow for a concrete backend.
pub async fn stress_with<B: ComputeBackend>(
    backend: Arc<B>,
    config: &AgentConfig,
    options: &StressOptions,
) -> anyhow::Result<StressReport> {
    let profile = config.profile;
    let thresholds = config.thresholds()?;
    let duration = options.duration.unwrap_or_else(|| config.duration());
    let probe = Arc::new(build_probe(config)?);
    if config.host_backend_with_gpu_telemetry() {
        tracing::warn!(
            backend = backend.name(),
            telemetry = ?config.telemetry,
            "Host backend devices are judged against GPU telemetry; peaks reflect the \
             physical GPUs, not the host workload",
        );
    }

    let selection = if options.gpus.is_empty() {
        DeviceSelection::All
    } else {
        DeviceSelection::Indices(options.gpus.clone())
    };

    tracing::info!(
        %profile,
        backend = backend.name(),
        duration_secs = duration.as_secs(),
        memory_threshold_pct = thresholds.min_memory_utilization_pct,
        max_temperature_c = thresholds.max_temperature_c,
        selection = ?selection,
        "Starting stress test",
    );

    let orchestrator = Orchestrator::new(
        backend,
        probe,
        OrchestratorSettings {
            memory_fraction: config.memory_fraction,
            max_iterations: options.max_iterations,
            join_grace: config.join_grace,
        },
    );
    let summary = orchestrator.run(&selection, duration).await;

    let writer = ReportWriter::new(&config.report_dir, profile.report_suffix(), config.write_json);
    let written = writer
        .write(&hostname(), profile, &thresholds, &summary)
        .await
        .with_context(|| format!("failed to write report to {}", writer.dir().display()))?;

    let (passed, failed) = tally(&summary.runs, &thresholds);
    for (index, verdict, note) in summary.verdicts(&thresholds) {
        match note {
            Some(note) => tracing::info!(gpu_index = index, %verdict, note = %note, "Device verdict"),
            None => tracing::info!(gpu_index = index, %verdict, "Device verdict"),
        }
    }
    tracing::info!(passed, failed, report = %written.text.display(), "Stress test finished");

    Ok(StressReport {
        profile,
        thresholds,
        summary,
        written,
        passed,
        failed,
    })
}

// ---------------------------------------------------------------------------
// Transfer
// ---------------------------------------------------------------------------

/// Run the pairwise transfer test, optionally logging topology alongside.
pub async fn transfer(
    config: &AgentConfig,
    options: &TransferOptions,
) -> anyhow::Result<Vec<PairResult>> {
    match config.backend {
        BackendKind::Host => transfer_with(Arc::new(host_backend(config)?), config, options).await,
        #[cfg(feature = "cuda")]
        BackendKind::Cuda => transfer_with(Arc::new(cuda_backend()?), config, options).await,
        #[cfg(not(feature = "cuda"))]
        BackendKind::Cuda => Err(cuda_unavailable()),
    }
}

pub async fn transfer_with<B: ComputeBackend>(
    backend: Arc<B>,
    config: &AgentConfig,
    options: &TransferOptions,
) -> anyhow::Result<Vec<PairResult>> {
    let size_gb = options.size_gb.unwrap_or(1.0);
    if !(size_gb.is_finite() && size_gb > 0.0) {
        anyhow::bail!("transfer size must be a positive number of GiB, got {size_gb}");
    }
    let settings = TransferSettings {
        payload_bytes: (size_gb * BYTES_PER_GIB as f64) as u64,
        ..TransferSettings::default()
    };

    let cancel = CancellationToken::new();
    let logger = options.topology_log.as_ref().map(|path| {
        let logger = TopologyLogger::new(
            &config.smi_program,
            path,
            DEFAULT_TOPOLOGY_INTERVAL,
            config.probe_timeout,
        );
        tokio::spawn(logger.run(cancel.clone()))
    });

    let result = run_transfer_test(backend, &settings).await;

    cancel.cancel();
    if let Some(handle) = logger {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Topology logger task failed");
        }
    }

    let results = result?;
    let failed = results.iter().filter(|r| r.speed_gbps.is_err()).count();
    tracing::info!(pairs = results.len(), failed, "Transfer test finished");
    Ok(results)
}

// ---------------------------------------------------------------------------
// I/O benchmark
// ---------------------------------------------------------------------------

pub async fn io_bench(config: &AgentConfig, options: &IoBenchOptions) -> anyhow::Result<IoBenchResult> {
    let settings = IoBenchSettings {
        dir: options.dir.clone().unwrap_or_else(|| config.report_dir.clone()),
        payload_bytes: options.size_mb * BYTES_PER_MB as usize,
        operations: options.operations,
    };
    Ok(run_io_bench(&settings).await?)
}
