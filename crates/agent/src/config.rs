//! Agent configuration loaded from environment variables.
//!
//! Command-line flags override the profile, duration and iteration cap; see
//! `main.rs`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use burnin_core::threshold_validation::{validate_fraction, validate_percent, validate_positive};
use burnin_core::verdict::{Profile, Thresholds};
use burnin_core::workload::DEFAULT_MEMORY_FRACTION;

use crate::orchestrator::DEFAULT_JOIN_GRACE;
use crate::probe::smi::{DEFAULT_PROBE_TIMEOUT, DEFAULT_SMI_PROGRAM};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Which compute backend drives the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Host,
    Cuda,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" | "cpu" => Ok(Self::Host),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(format!("unknown backend {other:?}, expected host or cuda")),
        }
    }
}

/// Which telemetry source the workers sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    Smi,
    Nvml,
}

impl FromStr for TelemetryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smi" | "nvidia-smi" => Ok(Self::Smi),
            "nvml" => Ok(Self::Nvml),
            other => Err(format!("unknown telemetry source {other:?}, expected smi or nvml")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub profile: Profile,
    /// `None` means the profile default.
    pub duration: Option<Duration>,
    /// `None` means the profile default.
    pub memory_threshold_pct: Option<f64>,
    /// `None` means the profile default.
    pub max_temperature_c: Option<f64>,
    pub memory_fraction: f64,
    pub probe_timeout: Duration,
    pub join_grace: Duration,
    pub backend: BackendKind,
    pub host_devices: u32,
    pub host_memory_mb: u64,
    pub telemetry: TelemetryKind,
    pub smi_program: PathBuf,
    pub report_dir: PathBuf,
    pub write_json: bool,
}

impl AgentConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default            |
    /// |-------------------------------|--------------------|
    /// | `BURNIN_PROFILE`              | `acceptance`       |
    /// | `BURNIN_DURATION_SECS`        | profile default    |
    /// | `BURNIN_MEMORY_THRESHOLD_PCT` | profile default    |
    /// | `BURNIN_MAX_TEMPERATURE_C`    | `85`               |
    /// | `BURNIN_MEMORY_FRACTION`      | `0.9`              |
    /// | `BURNIN_PROBE_TIMEOUT_SECS`   | `10`               |
    /// | `BURNIN_JOIN_GRACE_SECS`      | `120`              |
    /// | `BURNIN_BACKEND`              | `cuda` if built with the `cuda` feature, else `host` |
    /// | `BURNIN_HOST_DEVICES`         | `1`                |
    /// | `BURNIN_HOST_MEMORY_MB`       | `1024`             |
    /// | `BURNIN_TELEMETRY`            | `smi`              |
    /// | `BURNIN_SMI_PROGRAM`          | `nvidia-smi`       |
    /// | `BURNIN_REPORT_DIR`           | `.`                |
    /// | `BURNIN_WRITE_JSON`           | `true`             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AgentConfig::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let profile = parse_or(&lookup, "BURNIN_PROFILE", Profile::Acceptance)?;

        let duration = parse_opt::<u64, _>(&lookup, "BURNIN_DURATION_SECS")?.map(Duration::from_secs);

        let memory_threshold_pct = parse_opt::<f64, _>(&lookup, "BURNIN_MEMORY_THRESHOLD_PCT")?;
        if let Some(pct) = memory_threshold_pct {
            check("BURNIN_MEMORY_THRESHOLD_PCT", pct, validate_percent(pct, "memory threshold"))?;
        }

        let max_temperature_c = parse_opt::<f64, _>(&lookup, "BURNIN_MAX_TEMPERATURE_C")?;
        if let Some(temp) = max_temperature_c {
            check("BURNIN_MAX_TEMPERATURE_C", temp, validate_positive(temp, "temperature limit"))?;
        }

        let memory_fraction = parse_or(&lookup, "BURNIN_MEMORY_FRACTION", DEFAULT_MEMORY_FRACTION)?;
        check(
            "BURNIN_MEMORY_FRACTION",
            memory_fraction,
            validate_fraction(memory_fraction, "memory fraction"),
        )?;

        let probe_timeout_secs: u64 = parse_or(
            &lookup,
            "BURNIN_PROBE_TIMEOUT_SECS",
            DEFAULT_PROBE_TIMEOUT.as_secs(),
        )?;
        check(
            "BURNIN_PROBE_TIMEOUT_SECS",
            probe_timeout_secs,
            validate_positive(probe_timeout_secs as f64, "probe timeout"),
        )?;
        let probe_timeout = Duration::from_secs(probe_timeout_secs);
        let join_grace = Duration::from_secs(parse_or(
            &lookup,
            "BURNIN_JOIN_GRACE_SECS",
            DEFAULT_JOIN_GRACE.as_secs(),
        )?);

        let default_backend = if cfg!(feature = "cuda") {
            BackendKind::Cuda
        } else {
            BackendKind::Host
        };
        let backend = parse_or(&lookup, "BURNIN_BACKEND", default_backend)?;

        let host_devices: u32 = parse_or(&lookup, "BURNIN_HOST_DEVICES", 1)?;
        if host_devices == 0 {
            return Err(invalid("BURNIN_HOST_DEVICES", "0", "must be at least 1"));
        }
        let host_memory_mb: u64 = parse_or(&lookup, "BURNIN_HOST_MEMORY_MB", 1024)?;

        let telemetry = parse_or(&lookup, "BURNIN_TELEMETRY", TelemetryKind::Smi)?;
        let smi_program = lookup("BURNIN_SMI_PROGRAM")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SMI_PROGRAM));
        let report_dir = lookup("BURNIN_REPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let write_json = parse_or(&lookup, "BURNIN_WRITE_JSON", true)?;

        Ok(Self {
            profile,
            duration,
            memory_threshold_pct,
            max_temperature_c,
            memory_fraction,
            probe_timeout,
            join_grace,
            backend,
            host_devices,
            host_memory_mb,
            telemetry,
            smi_program,
            report_dir,
            write_json,
        })
    }

    /// Stress duration: explicit setting or the profile default.
    pub fn duration(&self) -> Duration {
        self.duration.unwrap_or_else(|| self.profile.default_duration())
    }

    /// True when virtual host devices are judged against telemetry read from
    /// real GPUs, whose memory and temperature the host workload never
    /// touches.
    pub fn host_backend_with_gpu_telemetry(&self) -> bool {
        match (self.backend, self.telemetry) {
            (BackendKind::Host, TelemetryKind::Smi | TelemetryKind::Nvml) => true,
            (BackendKind::Cuda, _) => false,
        }
    }

    /// Profile thresholds with any configured overrides applied.
    pub fn thresholds(&self) -> Result<Thresholds, ConfigError> {
        let defaults = self.profile.thresholds();
        let memory = self
            .memory_threshold_pct
            .unwrap_or(defaults.min_memory_utilization_pct);
        let temperature = self.max_temperature_c.unwrap_or(defaults.max_temperature_c);
        Thresholds::new(memory, temperature, defaults.require_throughput)
            .map_err(|e| invalid("BURNIN_MEMORY_THRESHOLD_PCT", &memory.to_string(), e.to_string()))
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn check<T: ToString, E: std::fmt::Display>(
    var: &'static str,
    value: T,
    result: Result<(), E>,
) -> Result<(), ConfigError> {
    result.map_err(|e| invalid(var, &value.to_string(), e.to_string()))
}

fn parse_opt<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(var, &raw, e.to_string())),
    }
}

fn parse_or<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(lookup, var)?.unwrap_or(default))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
