//! Scratch-file I/O micro-benchmark.
//!
//! Writes a random payload to a file, syncs it, reads it back and repeats.
//! The scratch file is removed whether or not the benchmark succeeds.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, thiserror::Error)]
pub enum IoBenchError {
    #[error("I/O benchmark needs a non-empty payload and at least one operation")]
    EmptyRun,

    #[error("scratch file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("read back {read} bytes, expected {expected}")]
    ShortRead { read: usize, expected: usize },
}

#[derive(Debug, Clone)]
pub struct IoBenchSettings {
    pub dir: PathBuf,
    pub payload_bytes: usize,
    pub operations: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct IoBenchResult {
    pub payload_bytes: usize,
    pub operations: u32,
    pub write_mb_per_sec: f64,
    pub read_mb_per_sec: f64,
}

/// Run the benchmark in `settings.dir`.
pub async fn run_io_bench(settings: &IoBenchSettings) -> Result<IoBenchResult, IoBenchError> {
    if settings.payload_bytes == 0 || settings.operations == 0 {
        return Err(IoBenchError::EmptyRun);
    }

    let mut payload = vec![0u8; settings.payload_bytes];
    rand::rng().fill(&mut payload[..]);

    let path = settings
        .dir
        .join(format!("burnin_io_test_{}.bin", std::process::id()));
    tracing::info!(
        path = %path.display(),
        payload_bytes = settings.payload_bytes,
        operations = settings.operations,
        "Starting I/O benchmark",
    );

    let result = timed_operations(&path, &payload, settings.operations).await;

    if let Err(e) = tokio::fs::remove_file(&path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch file");
        }
    }

    let (write_time, read_time) = result?;
    let total_mb = settings.payload_bytes as f64 * settings.operations as f64 / BYTES_PER_MB;
    let result = IoBenchResult {
        payload_bytes: settings.payload_bytes,
        operations: settings.operations,
        write_mb_per_sec: rate(total_mb, write_time),
        read_mb_per_sec: rate(total_mb, read_time),
    };

    tracing::info!(
        write_mb_per_sec = %format!("{:.2}", result.write_mb_per_sec),
        read_mb_per_sec = %format!("{:.2}", result.read_mb_per_sec),
        "I/O benchmark complete",
    );
    Ok(result)
}

async fn timed_operations(
    path: &Path,
    payload: &[u8],
    operations: u32,
) -> Result<(Duration, Duration), IoBenchError> {
    let mut write_time = Duration::ZERO;
    let mut read_time = Duration::ZERO;
    let mut buf = Vec::with_capacity(payload.len());

    for op in 0..operations {
        let start = Instant::now();
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(payload).await?;
        file.sync_all().await?;
        drop(file);
        write_time += start.elapsed();

        buf.clear();
        let start = Instant::now();
        let mut file = tokio::fs::File::open(path).await?;
        file.read_to_end(&mut buf).await?;
        read_time += start.elapsed();

        if buf.len() != payload.len() {
            return Err(IoBenchError::ShortRead {
                read: buf.len(),
                expected: payload.len(),
            });
        }
        tracing::debug!(operation = op + 1, "I/O operation complete");
    }

    Ok((write_time, read_time))
}

fn rate(mb: f64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        mb / secs
    } else {
        f64::INFINITY
    }
}
