//! Telemetry samples and peak tracking.
//!
//! [`parse_smi_csv`] turns the text printed by
//! `nvidia-smi --query-gpu=memory.total,memory.used,temperature.gpu
//! --format=csv,noheader,nounits` into a [`TelemetrySample`].
//! [`RunningPeaks`] folds samples into per-run maxima.

use serde::Serialize;

use crate::error::CoreError;

/// Fields requested from `nvidia-smi`, in the order they are printed.
pub const SMI_QUERY_FIELDS: &str = "memory.total,memory.used,temperature.gpu";

/// One device's memory and temperature at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TelemetrySample {
    pub total_memory_mb: u64,
    pub used_memory_mb: u64,
    pub temperature_c: u32,
}

impl TelemetrySample {
    /// Used / total as a percentage. Zero when the total is unknown.
    pub fn memory_utilization_pct(&self) -> f64 {
        if self.total_memory_mb == 0 {
            return 0.0;
        }
        self.used_memory_mb as f64 / self.total_memory_mb as f64 * 100.0
    }
}

/// Parse the CSV output of a single-device `nvidia-smi` query.
///
/// The first non-empty line must hold exactly three integers
/// (total MB, used MB, temperature °C). Anything else, including `[N/A]`
/// placeholders and empty output, is rejected.
pub fn parse_smi_csv(output: &str) -> Result<TelemetrySample, CoreError> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| CoreError::MalformedTelemetry("empty output".to_string()))?;

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(CoreError::MalformedTelemetry(format!(
            "expected 3 comma-separated fields, got {}: {line:?}",
            fields.len()
        )));
    }

    let parse = |value: &str, field: &str| -> Result<u64, CoreError> {
        value.parse::<u64>().map_err(|_| {
            CoreError::MalformedTelemetry(format!("{field} is not an integer: {value:?}"))
        })
    };

    let total_memory_mb = parse(fields[0], "memory.total")?;
    let used_memory_mb = parse(fields[1], "memory.used")?;
    let temperature_c = u32::try_from(parse(fields[2], "temperature.gpu")?).map_err(|_| {
        CoreError::MalformedTelemetry(format!("temperature out of range: {}", fields[2]))
    })?;

    Ok(TelemetrySample {
        total_memory_mb,
        used_memory_mb,
        temperature_c,
    })
}

/// Per-worker maxima across every successful sample of a run.
///
/// Values only ever grow. A run with no successful sample keeps the zero
/// floor, which is still a reportable result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningPeaks {
    pub max_used_memory_mb: u64,
    pub max_temperature_c: u32,
    pub max_memory_utilization_pct: f64,
    pub samples: u32,
}

impl RunningPeaks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, sample: &TelemetrySample) {
        self.max_used_memory_mb = self.max_used_memory_mb.max(sample.used_memory_mb);
        self.max_temperature_c = self.max_temperature_c.max(sample.temperature_c);
        self.max_memory_utilization_pct = self
            .max_memory_utilization_pct
            .max(sample.memory_utilization_pct());
        self.samples += 1;
    }
}
