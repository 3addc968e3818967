//! `nvidia-smi` telemetry probe.
//!
//! Runs one `nvidia-smi --query-gpu` per sample with `kill_on_drop`, so a
//! query that outlives its timeout is killed rather than left behind.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use burnin_core::device::DeviceIndex;
use burnin_core::telemetry::{parse_smi_csv, TelemetrySample, SMI_QUERY_FIELDS};

use super::{ProbeError, TelemetryProbe};

/// Default bound on a single query.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_SMI_PROGRAM: &str = "nvidia-smi";

#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    program: PathBuf,
    timeout: Duration,
}

impl NvidiaSmiProbe {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self::new(DEFAULT_SMI_PROGRAM, DEFAULT_PROBE_TIMEOUT)
    }
}

impl TelemetryProbe for NvidiaSmiProbe {
    async fn sample(&self, index: DeviceIndex) -> Result<TelemetrySample, ProbeError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(format!("--query-gpu={SMI_QUERY_FIELDS}"))
            .arg("--format=csv,noheader,nounits")
            .arg("-i")
            .arg(index.to_string());

        let stdout = run_bounded(&mut cmd, &self.program, self.timeout).await?;
        Ok(parse_smi_csv(&stdout)?)
    }
}

/// Capture `nvidia-smi topo -m` output.
pub async fn query_topology(program: &Path, timeout: Duration) -> Result<String, ProbeError> {
    let mut cmd = Command::new(program);
    cmd.arg("topo").arg("-m");
    run_bounded(&mut cmd, program, timeout).await
}

/// Run `cmd` to completion within `timeout` and return its stdout.
async fn run_bounded(
    cmd: &mut Command,
    program: &Path,
    timeout: Duration,
) -> Result<String, ProbeError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(output)) => Err(ProbeError::ExitStatus {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
        Ok(Err(e)) => Err(ProbeError::Spawn {
            program: program.display().to_string(),
            source: e,
        }),
        // The output future is dropped here, which kills the child.
        Err(_) => Err(ProbeError::Timeout {
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
