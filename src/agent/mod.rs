use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::export::health::HealthMetrics;
use crate::server::Server;
use crate::sink::aggregated::exporter::Exporter;
use crate::sink::aggregated::file::FileExporter;
use crate::sink::aggregated::flush::FlushScheduler;
use crate::sink::aggregated::Aggregator;

/// Agent wires the acceptor, the aggregator, the flush scheduler and the
/// health server together and owns their shutdown.
pub struct Agent {
    cfg: Config,
    port: u16,
    health: Arc<HealthMetrics>,
    aggregator: Arc<Aggregator>,
    exporters: Vec<Exporter>,
    scheduler: Option<JoinHandle<()>>,
    listen_addr: Option<SocketAddr>,
    health_addr: Option<SocketAddr>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent listening on `port`, initializing health metrics.
    pub fn new(cfg: Config, port: u16) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);

        Ok(Self {
            cfg,
            port,
            health,
            aggregator: Arc::new(Aggregator::new()),
            exporters: Vec::new(),
            scheduler: None,
            listen_addr: None,
            health_addr: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Adds an exporter next to the configured ones. Must be called before `start`.
    pub fn add_exporter(&mut self, exporter: Exporter) {
        self.exporters.push(exporter);
    }

    pub fn aggregator(&self) -> Arc<Aggregator> {
        Arc::clone(&self.aggregator)
    }

    pub fn health(&self) -> Arc<HealthMetrics> {
        Arc::clone(&self.health)
    }

    /// Address the producer listener is bound to, once started.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    /// Address the health server is bound to, if enabled and started.
    pub fn health_addr(&self) -> Option<SocketAddr> {
        self.health_addr
    }

    /// Start all components and begin collecting.
    pub async fn start(&mut self) -> Result<()> {
        // 0. Start health metrics server so probes respond early.
        self.health_addr = self
            .health
            .start()
            .await
            .context("starting health metrics server")?;

        // 1. Bind the producer listener.
        let addr = self
            .cfg
            .listen
            .socket_addr(self.port)
            .context("resolving listen address")?;
        let server = Server::bind(
            addr,
            Arc::clone(&self.aggregator),
            Arc::clone(&self.health),
        )
        .await?
        .with_max_line_bytes(self.cfg.listen.max_line_bytes);
        let listen_addr = server.local_addr()?;
        self.listen_addr = Some(listen_addr);

        // 2. Build exporters and start the flush scheduler.
        let mut scheduler = FlushScheduler::new(
            Arc::clone(&self.aggregator),
            self.cfg.flush.interval,
            Arc::clone(&self.health),
        );

        let file = FileExporter::from_config(&self.cfg.sinks.file);
        info!(
            bandwidth_path = %file.bandwidth_path().display(),
            delay_path = %file.delay_path().display(),
            "file exporter configured",
        );
        scheduler.add_exporter(file.into());

        for exporter in self.exporters.drain(..) {
            scheduler.add_exporter(exporter);
        }

        self.scheduler = Some(
            scheduler
                .start(self.cancel.clone())
                .await
                .context("starting flush scheduler")?,
        );

        // 3. Start accepting producers.
        tokio::spawn(server.run(self.cancel.clone()));

        info!(
            listen = %listen_addr,
            flush_interval = ?self.cfg.flush.interval,
            "agent started",
        );

        Ok(())
    }

    /// Stop accepting, flush the pending interval, and stop the health server.
    pub async fn stop(&mut self) -> Result<()> {
        // Signal all background tasks to stop.
        self.cancel.cancel();

        // Wait for the scheduler's final flush and exporter shutdown.
        if let Some(handle) = self.scheduler.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "flush scheduler task failed");
            }
        }

        // Stop health metrics server.
        self.health.stop().await?;

        info!("agent stopped");

        Ok(())
    }
}
