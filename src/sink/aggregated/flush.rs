use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::export::health::HealthMetrics;

use super::exporter::Exporter;
use super::{Aggregator, Interval};

/// Drives one drain-and-export cycle per tick.
///
/// Cycles run inside a single task and never overlap. An export that
/// outlasts the period delays the next drain rather than skipping it.
pub struct FlushScheduler {
    aggregator: Arc<Aggregator>,
    exporters: Vec<Exporter>,
    interval: Duration,
    health: Arc<HealthMetrics>,
}

impl FlushScheduler {
    pub fn new(
        aggregator: Arc<Aggregator>,
        interval: Duration,
        health: Arc<HealthMetrics>,
    ) -> Self {
        Self {
            aggregator,
            exporters: Vec::new(),
            interval,
            health,
        }
    }

    /// Adds an exporter. Exporters receive each interval in insertion order.
    pub fn add_exporter(&mut self, exporter: Exporter) {
        self.exporters.push(exporter);
    }

    /// Drains the aggregator once and hands the interval to every exporter.
    ///
    /// Export failures are logged and counted; the failed exporter's copy of
    /// the interval is dropped.
    pub async fn flush_once(&self) -> Interval {
        let interval = self.aggregator.drain();
        let started = Instant::now();

        for exporter in &self.exporters {
            if let Err(e) = exporter.export(&interval).await {
                self.health
                    .export_errors
                    .with_label_values(&[exporter.name()])
                    .inc();
                error!(
                    exporter = exporter.name(),
                    error = %format!("{e:#}"),
                    "export failed",
                );
            }
        }

        let elapsed = started.elapsed();
        self.health.flush_duration.observe(elapsed.as_secs_f64());
        self.health.flushes.inc();
        self.health.last_interval_bytes.set(interval.bytes as f64);
        self.health
            .last_interval_delays
            .set(interval.delays.len() as f64);

        let window = interval
            .ended_at
            .duration_since(interval.started_at)
            .unwrap_or_default();
        debug!(
            bytes = interval.bytes,
            delays = interval.delays.len(),
            window = ?window,
            elapsed = ?elapsed,
            "interval flushed",
        );

        interval
    }

    /// Starts every exporter, then spawns the tick loop.
    ///
    /// The first drain happens one period after this call. When `ctx` is
    /// cancelled the loop performs a final drain, stops the exporters and
    /// exits; await the returned handle to wait for that.
    pub async fn start(mut self, ctx: CancellationToken) -> Result<JoinHandle<()>> {
        for exporter in &mut self.exporters {
            let name = exporter.name().to_string();
            exporter
                .start()
                .await
                .with_context(|| format!("starting {name} exporter"))?;
        }

        info!(
            interval = ?self.interval,
            exporters = self.exporters.len(),
            "flush scheduler started",
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // Consume the immediate first tick.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        let last = self.flush_once().await;
                        info!(
                            bytes = last.bytes,
                            delays = last.delays.len(),
                            "final flush",
                        );

                        for exporter in &mut self.exporters {
                            if let Err(e) = exporter.stop().await {
                                error!(
                                    exporter = exporter.name(),
                                    error = %format!("{e:#}"),
                                    "exporter stop failed",
                                );
                            }
                        }

                        return;
                    }

                    _ = ticker.tick() => {
                        self.flush_once().await;
                    }
                }
            }
        });

        Ok(handle)
    }
}
