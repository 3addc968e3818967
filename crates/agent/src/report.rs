//! Report persistence.
//!
//! The text report is the pass/fail record of a run. It is rendered by
//! `burnin_core::report` and written once, after every worker has finished,
//! to `<dir>/<hostname><suffix>`. A JSON summary with the full metrics can
//! be written alongside it.

use std::path::{Path, PathBuf};

use serde::Serialize;

use burnin_core::outcome::DeviceRun;
use burnin_core::report::{render, RenderOptions};
use burnin_core::verdict::{evaluate_with_note, Profile, Thresholds, Verdict};

use crate::orchestrator::RunSummary;

#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
    suffix: String,
    write_json: bool,
}

/// JSON summary layout.
#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    hostname: &'a str,
    profile: Profile,
    thresholds: &'a Thresholds,
    #[serde(flatten)]
    summary: &'a RunSummary,
    verdicts: Vec<JsonVerdict<'a>>,
}

#[derive(Debug, Serialize)]
struct JsonVerdict<'a> {
    index: u32,
    name: &'a str,
    verdict: Verdict,
    note: Option<String>,
}

/// Paths written by [`ReportWriter::write`].
#[derive(Debug, Clone)]
pub struct WrittenReport {
    pub text: PathBuf,
    pub json: Option<PathBuf>,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>, write_json: bool) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
            write_json,
        }
    }

    /// Report path for a host.
    pub fn text_path(&self, hostname: &str) -> PathBuf {
        self.dir.join(format!("{hostname}{}", self.suffix))
    }

    pub fn json_path(&self, hostname: &str) -> PathBuf {
        self.text_path(hostname).with_extension("json")
    }

    /// Render and write the report, returning the paths written.
    pub async fn write(
        &self,
        hostname: &str,
        profile: Profile,
        thresholds: &Thresholds,
        summary: &RunSummary,
    ) -> std::io::Result<WrittenReport> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let text = render(
            &summary.runs,
            thresholds,
            RenderOptions {
                include_throughput: profile.reports_throughput(),
            },
        );
        let text_path = self.text_path(hostname);
        tokio::fs::write(&text_path, text).await?;
        tracing::info!(path = %text_path.display(), "Report saved");

        let json = if self.write_json {
            let path = self.json_path(hostname);
            let report = JsonReport {
                hostname,
                profile,
                thresholds,
                summary,
                verdicts: summary.runs.iter().map(|run| json_verdict(run, thresholds)).collect(),
            };
            let body = serde_json::to_vec_pretty(&report).map_err(std::io::Error::other)?;
            tokio::fs::write(&path, body).await?;
            tracing::info!(path = %path.display(), "JSON summary saved");
            Some(path)
        } else {
            None
        };

        Ok(WrittenReport {
            text: text_path,
            json,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn json_verdict<'a>(run: &'a DeviceRun, thresholds: &Thresholds) -> JsonVerdict<'a> {
    let (verdict, note) = evaluate_with_note(&run.outcome, thresholds);
    JsonVerdict {
        index: run.index,
        name: run.display_name(),
        verdict,
        note,
    }
}

/// This machine's host name, used to name the report file.
///
/// Falls back to `localhost` if the name cannot be read.
pub fn hostname() -> String {
    #[cfg(unix)]
    {
        let mut buf = [0u8; 256];
        // Safety: the buffer is valid for `buf.len()` bytes and gethostname
        // writes at most that many.
        let ret = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
        if ret == 0 {
            let len = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
            let name = String::from_utf8_lossy(&buf[..len]).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_use_host_and_suffix() {
        let writer = ReportWriter::new("/var/reports", Profile::Performance.report_suffix(), true);
        assert_eq!(
            writer.text_path("node-07"),
            PathBuf::from("/var/reports/node-07_performance.txt")
        );
        assert_eq!(
            writer.json_path("node-07"),
            PathBuf::from("/var/reports/node-07_performance.json")
        );
    }

    #[test]
    fn hostname_is_not_empty() {
        assert!(!hostname().is_empty());
    }
}
