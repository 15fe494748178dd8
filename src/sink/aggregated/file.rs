//! Append-only log files for per-interval bandwidth and delay measurements.
//!
//! Each flush appends exactly one line to each log:
//! - bandwidth log: the interval's byte total as a decimal integer.
//! - delay log: `0` when no samples were recorded, otherwise the samples
//!   separated by single spaces.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::config::FileSinkConfig;
use super::Interval;

/// Writes drained intervals to two independent append-only logs.
#[derive(Debug, Clone)]
pub struct FileExporter {
    bandwidth_path: PathBuf,
    delay_path: PathBuf,
}

impl FileExporter {
    /// Creates an exporter for the given log paths.
    pub fn new(bandwidth_path: impl Into<PathBuf>, delay_path: impl Into<PathBuf>) -> Self {
        Self {
            bandwidth_path: bandwidth_path.into(),
            delay_path: delay_path.into(),
        }
    }

    /// Creates an exporter from the file sink configuration.
    pub fn from_config(cfg: &FileSinkConfig) -> Self {
        Self::new(cfg.bandwidth_path.clone(), cfg.delay_path.clone())
    }

    pub fn name(&self) -> &str {
        "file"
    }

    pub fn bandwidth_path(&self) -> &Path {
        &self.bandwidth_path
    }

    pub fn delay_path(&self) -> &Path {
        &self.delay_path
    }

    /// Nothing to open up front; files are opened per write.
    pub async fn start(&mut self) -> Result<()> {
        debug!(
            bandwidth_path = %self.bandwidth_path.display(),
            delay_path = %self.delay_path.display(),
            "file exporter ready",
        );
        Ok(())
    }

    /// Appends one line to each log.
    ///
    /// A failure on one log does not prevent the write to the other. The
    /// failed line is dropped and reported in the returned error.
    pub async fn export(&self, interval: &Interval) -> Result<()> {
        let bandwidth = append_line(&self.bandwidth_path, &format_bandwidth_line(interval.bytes))
            .await
            .with_context(|| format!("appending to {}", self.bandwidth_path.display()));
        let delays = append_line(&self.delay_path, &format_delay_line(&interval.delays))
            .await
            .with_context(|| format!("appending to {}", self.delay_path.display()));

        match (bandwidth, delays) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(bw), Err(dl)) => {
                warn!(error = %format!("{bw:#}"), "bandwidth log write failed");
                Err(dl.context("both log writes failed"))
            }
        }
    }

    pub async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Formats the bandwidth log line for one interval.
pub fn format_bandwidth_line(bytes: u64) -> String {
    bytes.to_string()
}

/// Formats the delay log line for one interval.
///
/// Values use the shortest decimal representation that round-trips,
/// without exponent notation.
pub fn format_delay_line(delays: &[f64]) -> String {
    if delays.is_empty() {
        return "0".to_string();
    }

    let mut line = String::with_capacity(delays.len() * 20);
    for (i, delay) in delays.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        // Writing to a String cannot fail.
        let _ = write!(line, "{delay}");
    }
    line
}

async fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .context("opening log file")?;

    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');

    file.write_all(&buf).await.context("writing log line")?;
    file.flush().await.context("flushing log file")?;

    Ok(())
}
