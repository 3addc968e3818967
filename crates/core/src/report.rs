//! Plain-text report rendering.
//!
//! One block per device in selection order, blocks separated by a blank
//! line:
//!
//! ```text
//! GPU 0: NVIDIA A100-SXM4-80GB
//! Status: PASS
//! Performance: 1.52e+13 FLOPS
//! Peak Memory Utilization: 91.27%
//! Peak Temperature: 71°C
//! ```
//!
//! The `Performance` line only appears when the profile reports throughput.
//! Failed devices get an `Error:` line instead of the metric lines.

use crate::outcome::{DeviceRun, Outcome};
use crate::verdict::{evaluate_with_note, Thresholds, Verdict};

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub include_throughput: bool,
}

/// Render every device run into the report body.
pub fn render(runs: &[DeviceRun], thresholds: &Thresholds, options: RenderOptions) -> String {
    let mut lines = Vec::with_capacity(runs.len() * 6);

    for run in runs {
        let (verdict, _note) = evaluate_with_note(&run.outcome, thresholds);
        lines.push(format!("GPU {}: {}", run.index, run.display_name()));
        lines.push(format!("Status: {verdict}"));

        match &run.outcome {
            Outcome::Failure { message, .. } => {
                lines.push(format!("Error: {message}"));
            }
            Outcome::Success(metrics) => {
                if options.include_throughput {
                    lines.push(match metrics.average_flops {
                        Some(flops) => format!("Performance: {} FLOPS", format_sci(flops)),
                        None => "Performance: unavailable".to_string(),
                    });
                }
                lines.push(format!(
                    "Peak Memory Utilization: {:.2}%",
                    metrics.peak_memory_utilization_pct
                ));
                lines.push(format!("Peak Temperature: {}°C", metrics.peak_temperature_c));
            }
        }

        lines.push(String::new());
    }

    lines.join("\n")
}

/// Count of PASS and FAIL verdicts, for the closing log line.
pub fn tally(runs: &[DeviceRun], thresholds: &Thresholds) -> (usize, usize) {
    runs.iter()
        .map(|run| evaluate_with_note(&run.outcome, thresholds).0)
        .fold((0, 0), |(pass, fail), v| match v {
            Verdict::Pass => (pass + 1, fail),
            Verdict::Fail => (pass, fail + 1),
        })
}

/// Format like `{:.2e}` with an explicitly signed two-digit exponent,
/// e.g. `1.52e+13`.
pub fn format_sci(value: f64) -> String {
    let raw = format!("{value:.2e}");
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::outcome::{FailureKind, StressMetrics};
    use crate::verdict::Profile;

    fn success(index: u32, util: f64, temp: u32, flops: Option<f64>) -> DeviceRun {
        DeviceRun {
            index,
            name: Some(format!("Test GPU {index}")),
            outcome: Outcome::Success(StressMetrics {
                peak_memory_utilization_pct: util,
                peak_temperature_c: temp,
                peak_used_memory_mb: 800,
                average_flops: flops,
                matrix_dim: 1000,
                iterations: 2,
                total_flops: 4_010_000_000,
                compute_time: Duration::from_secs(1),
                telemetry_samples: 2,
                probe_failures: 0,
            }),
        }
    }

    #[test]
    fn renders_acceptance_blocks_in_order() {
        let runs = vec![
            success(1, 80.0, 60, Some(4.01e9)),
            DeviceRun {
                index: 5,
                name: None,
                outcome: Outcome::failure(
                    FailureKind::InvalidDevice,
                    "GPU index 5 is out of range. Available GPUs: 2",
                ),
            },
        ];
        let text = render(
            &runs,
            &Profile::Acceptance.thresholds(),
            RenderOptions {
                include_throughput: false,
            },
        );
        let expected = "GPU 1: Test GPU 1\n\
                        Status: PASS\n\
                        Peak Memory Utilization: 80.00%\n\
                        Peak Temperature: 60°C\n\
                        \n\
                        GPU 5: unknown device\n\
                        Status: FAIL\n\
                        Error: GPU index 5 is out of range. Available GPUs: 2\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn performance_block_includes_throughput() {
        let text = render(
            &[success(0, 91.27, 71, Some(1.523e13))],
            &Profile::Performance.thresholds(),
            RenderOptions {
                include_throughput: true,
            },
        );
        assert!(text.contains("Status: PASS"));
        assert!(text.contains("Performance: 1.52e+13 FLOPS"));
        assert!(text.contains("Peak Memory Utilization: 91.27%"));
    }

    #[test]
    fn unavailable_throughput_is_rendered() {
        let text = render(
            &[success(0, 91.0, 71, None)],
            &Profile::Performance.thresholds(),
            RenderOptions {
                include_throughput: true,
            },
        );
        assert!(text.contains("Performance: unavailable"));
        assert!(text.contains("Status: FAIL"));
    }

    #[test]
    fn empty_run_renders_empty_report() {
        let text = render(
            &[],
            &Profile::Acceptance.thresholds(),
            RenderOptions {
                include_throughput: false,
            },
        );
        assert!(text.is_empty());
    }

    #[test]
    fn tally_counts_verdicts() {
        let runs = vec![success(0, 80.0, 60, None), success(1, 10.0, 60, None)];
        assert_eq!(tally(&runs, &Profile::Acceptance.thresholds()), (1, 1));
    }

    #[test]
    fn scientific_formatting() {
        assert_eq!(format_sci(4_010_000_000.0), "4.01e+09");
        assert_eq!(format_sci(1.523e13), "1.52e+13");
        assert_eq!(format_sci(0.5), "5.00e-01");
    }
}
