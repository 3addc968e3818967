//! Report file tests: naming, text layout and the JSON summary.

mod common;

use std::sync::Arc;
use std::time::Duration;

use burnin_agent::orchestrator::{DeviceSelection, Orchestrator, OrchestratorSettings, RunSummary};
use burnin_agent::report::ReportWriter;
use burnin_core::verdict::Profile;

use common::{FixedProbe, MockBackend};

async fn summary(selection: Vec<u32>) -> RunSummary {
    let orchestrator = Orchestrator::new(
        Arc::new(MockBackend::new(2)),
        Arc::new(FixedProbe::healthy()),
        OrchestratorSettings {
            memory_fraction: 0.9,
            max_iterations: Some(2),
            join_grace: Duration::from_secs(30),
        },
    );
    orchestrator
        .run(&DeviceSelection::Indices(selection), Duration::from_secs(30))
        .await
}

#[tokio::test]
async fn acceptance_report_text() {
    let dir = tempfile::tempdir().expect("tempdir");
    let summary = summary(vec![1, 7]).await;
    let profile = Profile::Acceptance;
    let writer = ReportWriter::new(dir.path(), profile.report_suffix(), false);

    let written = writer
        .write("node-01", profile, &profile.thresholds(), &summary)
        .await
        .expect("write report");

    assert_eq!(written.text, dir.path().join("node-01.txt"));
    assert!(written.json.is_none());

    let text = std::fs::read_to_string(&written.text).expect("read report");
    assert_eq!(
        text,
        "GPU 1: Mock GPU 1\n\
         Status: PASS\n\
         Peak Memory Utilization: 80.00%\n\
         Peak Temperature: 60°C\n\
         \n\
         GPU 7: unknown device\n\
         Status: FAIL\n\
         Error: GPU index 7 is out of range. Available GPUs: 2\n"
    );
}

#[tokio::test]
async fn performance_report_includes_throughput_and_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let summary = summary(vec![0]).await;
    let profile = Profile::Performance;
    let writer = ReportWriter::new(dir.path().join("reports"), profile.report_suffix(), true);

    let written = writer
        .write("node-02", profile, &profile.thresholds(), &summary)
        .await
        .expect("write report");

    assert_eq!(written.text, dir.path().join("reports/node-02_performance.txt"));
    let text = std::fs::read_to_string(&written.text).expect("read report");
    assert!(text.starts_with("GPU 0: Mock GPU 0\nStatus: PASS\nPerformance: "));
    assert!(text.contains(" FLOPS\nPeak Memory Utilization: 80.00%\n"));

    let json_path = written.json.expect("json summary written");
    assert_eq!(json_path, dir.path().join("reports/node-02_performance.json"));
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(json_path).expect("read json"))
            .expect("valid json");

    assert_eq!(json["hostname"], "node-02");
    assert_eq!(json["profile"], "performance");
    assert_eq!(json["discovered"], 2);
    assert_eq!(json["runs"][0]["outcome"]["status"], "success");
    assert_eq!(json["runs"][0]["outcome"]["iterations"], 2);
    assert_eq!(json["verdicts"][0]["verdict"], "PASS");
    assert!(json["verdicts"][0]["note"].is_null());
}
