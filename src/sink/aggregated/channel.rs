use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::Interval;

/// Forwards drained intervals to an in-process consumer.
///
/// Sending never blocks the flush loop: a full or closed channel drops the
/// interval and reports it as an export error.
#[derive(Debug, Clone)]
pub struct ChannelExporter {
    tx: mpsc::Sender<Interval>,
}

impl ChannelExporter {
    /// Creates an exporter and the receiver that consumes its intervals.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Interval>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn name(&self) -> &str {
        "channel"
    }

    pub async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    pub async fn export(&self, interval: &Interval) -> Result<()> {
        match self.tx.try_send(interval.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => bail!("interval channel full, interval dropped"),
            Err(TrySendError::Closed(_)) => bail!("interval channel closed, interval dropped"),
        }
    }

    pub async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}
