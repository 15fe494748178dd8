use anyhow::Result;

use super::channel::ChannelExporter;
use super::file::FileExporter;
use super::Interval;

/// Exporter dispatches drained intervals to the configured persistence backends.
///
/// Uses enum dispatch rather than trait objects so async calls stay
/// statically dispatched.
#[derive(Debug)]
pub enum Exporter {
    File(FileExporter),
    Channel(ChannelExporter),
}

impl Exporter {
    /// Returns the exporter name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::File(e) => e.name(),
            Self::Channel(e) => e.name(),
        }
    }

    /// Initialize the exporter.
    pub async fn start(&mut self) -> Result<()> {
        match self {
            Self::File(e) => e.start().await,
            Self::Channel(e) => e.start().await,
        }
    }

    /// Export one drained interval.
    pub async fn export(&self, interval: &Interval) -> Result<()> {
        match self {
            Self::File(e) => e.export(interval).await,
            Self::Channel(e) => e.export(interval).await,
        }
    }

    /// Shut down the exporter.
    pub async fn stop(&mut self) -> Result<()> {
        match self {
            Self::File(e) => e.stop().await,
            Self::Channel(e) => e.stop().await,
        }
    }
}

impl From<FileExporter> for Exporter {
    fn from(e: FileExporter) -> Self {
        Self::File(e)
    }
}

impl From<ChannelExporter> for Exporter {
    fn from(e: ChannelExporter) -> Self {
        Self::Channel(e)
    }
}
