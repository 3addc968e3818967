//! `burnin-agent` -- multi-GPU stress and acceptance harness.
//!
//! Saturates every selected device with a dense matrix workload for a fixed
//! duration while sampling memory and temperature, then writes a PASS/FAIL
//! report named after the host. Also runs a pairwise transfer test and a
//! scratch-file I/O benchmark.
//!
//! Configuration comes from `BURNIN_*` environment variables (see
//! [`burnin_agent::config::AgentConfig::from_env`]); command-line flags
//! override the profile, duration and device selection.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burnin_agent::commands::{self, IoBenchOptions, StressOptions, TransferOptions};
use burnin_agent::config::AgentConfig;
use burnin_core::verdict::Profile;

#[derive(Debug, Parser)]
#[command(name = "burnin-agent", version, about, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Flags for the default `stress` command.
    #[command(flatten)]
    stress: StressArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stress the selected GPUs and write a PASS/FAIL report (default).
    Stress(StressArgs),
    /// Measure copy speed between every ordered pair of GPUs.
    Transfer(TransferArgs),
    /// Write and read back a scratch file to measure disk throughput.
    IoBench(IoBenchArgs),
}

#[derive(Debug, Clone, Args)]
struct StressArgs {
    /// GPU indices to test. Defaults to every detected GPU.
    #[arg(long = "gpu", value_name = "INDEX", num_args = 1..)]
    gpus: Vec<u32>,

    /// Test duration in seconds. Defaults to the profile's duration.
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Threshold profile: `acceptance` or `performance`.
    #[arg(long)]
    profile: Option<Profile>,

    /// Stop each device after this many steps.
    #[arg(long, value_name = "N")]
    max_iterations: Option<u64>,

    /// Exit with status 1 if any device fails.
    #[arg(long)]
    strict: bool,
}

#[derive(Debug, Clone, Args)]
struct TransferArgs {
    /// Payload per transfer, in GiB.
    #[arg(long, value_name = "GIB", default_value_t = 1.0)]
    size_gb: f64,

    /// Append `nvidia-smi topo -m` snapshots to this file during the test.
    #[arg(long, value_name = "PATH")]
    topology_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct IoBenchArgs {
    /// Payload per operation, in MiB.
    #[arg(long, value_name = "MB", default_value_t = 1024)]
    size_mb: usize,

    /// Number of write/read cycles.
    #[arg(long, value_name = "N", default_value_t = 10)]
    operations: u32,

    /// Directory for the scratch file. Defaults to the report directory.
    #[arg(long, value_name = "PATH")]
    dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "burnin_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "burnin-agent failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = AgentConfig::from_env()?;

    match cli.command.unwrap_or(Command::Stress(cli.stress)) {
        Command::Stress(args) => {
            let options = StressOptions {
                gpus: args.gpus,
                duration: args.duration.map(std::time::Duration::from_secs),
                profile: args.profile,
                max_iterations: args.max_iterations,
            };
            let report = commands::stress(&config, &options).await?;
            if args.strict && report.failed > 0 {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Transfer(args) => {
            let options = TransferOptions {
                size_gb: Some(args.size_gb),
                topology_log: args.topology_log,
            };
            commands::transfer(&config, &options).await?;
        }
        Command::IoBench(args) => {
            let options = IoBenchOptions {
                size_mb: args.size_mb,
                operations: args.operations,
                dir: args.dir,
            };
            commands::io_bench(&config, &options).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
