//! PASS/FAIL policy.
//!
//! A verdict is never stored; it is derived from an [`Outcome`] and a
//! [`Thresholds`] pair every time it is needed. Both comparisons are strict:
//! utilization exactly at the memory threshold fails, and a temperature
//! exactly at the limit fails.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::CoreError;
use crate::outcome::Outcome;
use crate::threshold_validation::validate_percent;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    /// PASS requires peak utilization strictly above this percentage.
    pub min_memory_utilization_pct: f64,
    /// PASS requires peak temperature strictly below this value.
    pub max_temperature_c: f64,
    /// PASS additionally requires an average throughput figure.
    pub require_throughput: bool,
}

impl Thresholds {
    pub fn new(
        min_memory_utilization_pct: f64,
        max_temperature_c: f64,
        require_throughput: bool,
    ) -> Result<Self, CoreError> {
        validate_percent(min_memory_utilization_pct, "memory utilization threshold")?;
        if !max_temperature_c.is_finite() {
            return Err(CoreError::Validation(format!(
                "temperature threshold must be finite, got {max_temperature_c}"
            )));
        }
        Ok(Self {
            min_memory_utilization_pct,
            max_temperature_c,
            require_throughput,
        })
    }
}

/// The two acceptance variants operators run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Short stress run: memory > 70 %, temperature < 85 °C, 3 minutes.
    Acceptance,
    /// Longer benchmark: memory > 75 %, temperature < 85 °C, 10 minutes,
    /// throughput reported and required.
    Performance,
}

impl Profile {
    pub fn thresholds(self) -> Thresholds {
        match self {
            Self::Acceptance => Thresholds {
                min_memory_utilization_pct: 70.0,
                max_temperature_c: 85.0,
                require_throughput: false,
            },
            Self::Performance => Thresholds {
                min_memory_utilization_pct: 75.0,
                max_temperature_c: 85.0,
                require_throughput: true,
            },
        }
    }

    pub fn default_duration(self) -> Duration {
        match self {
            Self::Acceptance => Duration::from_secs(180),
            Self::Performance => Duration::from_secs(600),
        }
    }

    /// Appended to the host name to form the report file name.
    pub fn report_suffix(self) -> &'static str {
        match self {
            Self::Acceptance => ".txt",
            Self::Performance => "_performance.txt",
        }
    }

    pub fn reports_throughput(self) -> bool {
        matches!(self, Self::Performance)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acceptance => f.write_str("acceptance"),
            Self::Performance => f.write_str("performance"),
        }
    }
}

impl FromStr for Profile {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "acceptance" => Ok(Self::Acceptance),
            "performance" => Ok(Self::Performance),
            other => Err(CoreError::Validation(format!(
                "unknown profile {other:?}, expected \"acceptance\" or \"performance\""
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("PASS"),
            Self::Fail => f.write_str("FAIL"),
        }
    }
}

/// Classify one outcome.
pub fn evaluate(outcome: &Outcome, thresholds: &Thresholds) -> Verdict {
    let metrics = match outcome {
        Outcome::Success(metrics) => metrics,
        Outcome::Failure { .. } => return Verdict::Fail,
    };

    let memory_ok = metrics.peak_memory_utilization_pct > thresholds.min_memory_utilization_pct;
    let temperature_ok = f64::from(metrics.peak_temperature_c) < thresholds.max_temperature_c;
    let throughput_ok = !thresholds.require_throughput || metrics.average_flops.is_some();

    if memory_ok && temperature_ok && throughput_ok {
        Verdict::Pass
    } else {
        Verdict::Fail
    }
}

/// Verdict plus the explanatory note shown next to it.
///
/// Failures carry their error message; failed thresholds name the check
/// that did not hold.
pub fn evaluate_with_note(outcome: &Outcome, thresholds: &Thresholds) -> (Verdict, Option<String>) {
    match outcome {
        Outcome::Failure { message, .. } => (Verdict::Fail, Some(message.clone())),
        Outcome::Success(metrics) => {
            let verdict = evaluate(outcome, thresholds);
            if verdict == Verdict::Pass {
                return (verdict, None);
            }
            let mut reasons = Vec::new();
            if metrics.peak_memory_utilization_pct <= thresholds.min_memory_utilization_pct {
                reasons.push(format!(
                    "peak memory utilization {:.2}% not above {:.2}%",
                    metrics.peak_memory_utilization_pct, thresholds.min_memory_utilization_pct
                ));
            }
            if f64::from(metrics.peak_temperature_c) >= thresholds.max_temperature_c {
                reasons.push(format!(
                    "peak temperature {}°C not below {}°C",
                    metrics.peak_temperature_c, thresholds.max_temperature_c
                ));
            }
            if thresholds.require_throughput && metrics.average_flops.is_none() {
                reasons.push("no throughput measured".to_string());
            }
            (verdict, Some(reasons.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{FailureKind, StressMetrics};

    fn metrics(util_pct: f64, temp_c: u32, average_flops: Option<f64>) -> Outcome {
        Outcome::Success(StressMetrics {
            peak_memory_utilization_pct: util_pct,
            peak_temperature_c: temp_c,
            peak_used_memory_mb: 0,
            average_flops,
            matrix_dim: 1000,
            iterations: 2,
            total_flops: 4_010_000_000,
            compute_time: Duration::from_secs(2),
            telemetry_samples: 2,
            probe_failures: 0,
        })
    }

    fn thresholds(mem: f64, temp: f64) -> Thresholds {
        Thresholds::new(mem, temp, false).unwrap()
    }

    #[test]
    fn failure_is_always_fail_with_message() {
        let outcome = Outcome::failure(FailureKind::ComputeError, "device fault");
        let (verdict, note) = evaluate_with_note(&outcome, &thresholds(0.0, 1000.0));
        assert_eq!(verdict, Verdict::Fail);
        assert_eq!(note.as_deref(), Some("device fault"));
    }

    #[test]
    fn memory_exactly_at_threshold_fails() {
        assert_eq!(evaluate(&metrics(70.0, 60, None), &thresholds(70.0, 85.0)), Verdict::Fail);
    }

    #[test]
    fn memory_just_above_threshold_passes() {
        assert_eq!(evaluate(&metrics(70.01, 60, None), &thresholds(70.0, 85.0)), Verdict::Pass);
    }

    #[test]
    fn temperature_boundaries_are_strict() {
        // Integer telemetry cannot read 84.99, so exercise the boundary
        // through the threshold instead: 84 < 84.99 passes, 85 < 85 fails.
        assert_eq!(evaluate(&metrics(80.0, 84, None), &thresholds(70.0, 84.99)), Verdict::Pass);
        assert_eq!(evaluate(&metrics(80.0, 85, None), &thresholds(70.0, 85.0)), Verdict::Fail);
        assert_eq!(evaluate(&metrics(80.0, 84, None), &thresholds(70.0, 85.0)), Verdict::Pass);
    }

    #[test]
    fn zero_floor_peaks_fail() {
        let (verdict, note) = evaluate_with_note(&metrics(0.0, 0, None), &thresholds(70.0, 85.0));
        assert_eq!(verdict, Verdict::Fail);
        assert!(note.unwrap().contains("memory utilization"));
    }

    #[test]
    fn performance_profile_requires_throughput() {
        let perf = Profile::Performance.thresholds();
        assert_eq!(evaluate(&metrics(80.0, 60, None), &perf), Verdict::Fail);
        assert_eq!(evaluate(&metrics(80.0, 60, Some(1.0e12)), &perf), Verdict::Pass);
        // 74 % passes acceptance but not performance.
        assert_eq!(evaluate(&metrics(74.0, 60, Some(1.0e12)), &perf), Verdict::Fail);
        assert_eq!(
            evaluate(&metrics(74.0, 60, None), &Profile::Acceptance.thresholds()),
            Verdict::Pass
        );
    }

    #[test]
    fn note_lists_every_failed_check() {
        let perf = Profile::Performance.thresholds();
        let (_, note) = evaluate_with_note(&metrics(50.0, 90, None), &perf);
        let note = note.unwrap();
        assert!(note.contains("memory"));
        assert!(note.contains("temperature"));
        assert!(note.contains("throughput"));
    }

    #[test]
    fn profile_round_trips_through_str() {
        assert_eq!("acceptance".parse::<Profile>().unwrap(), Profile::Acceptance);
        assert_eq!(" Performance ".parse::<Profile>().unwrap(), Profile::Performance);
        assert!("burn".parse::<Profile>().is_err());
        assert_eq!(Profile::Performance.to_string(), "performance");
    }

    #[test]
    fn profile_defaults() {
        assert_eq!(Profile::Acceptance.default_duration(), Duration::from_secs(180));
        assert_eq!(Profile::Performance.default_duration(), Duration::from_secs(600));
        assert_eq!(Profile::Acceptance.report_suffix(), ".txt");
        assert_eq!(Profile::Performance.report_suffix(), "_performance.txt");
    }

    #[test]
    fn thresholds_reject_out_of_range_memory() {
        assert!(Thresholds::new(120.0, 85.0, false).is_err());
        assert!(Thresholds::new(70.0, f64::NAN, false).is_err());
    }
}
