use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock;
use crate::export::health::HealthMetrics;
use crate::ingest::{Ingestor, DEFAULT_MAX_LINE_BYTES};
use crate::sink::aggregated::Aggregator;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Accepts producer connections and spawns one ingestor task per connection.
pub struct Server {
    listener: TcpListener,
    aggregator: Arc<Aggregator>,
    health: Arc<HealthMetrics>,
    max_line_bytes: usize,
}

impl Server {
    /// Binds the listening socket. Failure here is a startup error.
    pub async fn bind(
        addr: SocketAddr,
        aggregator: Arc<Aggregator>,
        health: Arc<HealthMetrics>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding listener on {addr}"))?;

        Ok(Self {
            listener,
            aggregator,
            health,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        })
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("getting local address")
    }

    /// Runs the accept loop until `ctx` is cancelled.
    ///
    /// Connections already being ingested are left to finish on their own.
    pub async fn run(self, ctx: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "listening for producers"),
            Err(e) => warn!(error = %e, "listening for producers on unknown address"),
        }

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("shutdown initiated, stopping accept loop");
                    return;
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_ingestor(stream, peer),
                        Err(e) => {
                            self.health.accept_errors.inc();
                            warn!(error = %e, "accept failed");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }

    fn spawn_ingestor(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        self.health.connections_accepted.inc();
        debug!(peer = %peer, "connection accepted");

        let ingestor = Ingestor::new(
            Arc::clone(&self.aggregator),
            Arc::clone(&self.health),
            clock::now_unix_secs(),
        )
        .with_peer(peer)
        .with_max_line_bytes(self.max_line_bytes);

        tokio::spawn(async move {
            if let Err(e) = ingestor.run(stream).await {
                warn!(peer = %peer, error = %format!("{e:#}"), "connection failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    use super::*;

    async fn wait_for_bytes(agg: &Aggregator, bytes: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while agg.pending().0 < bytes {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("bytes arrived within timeout");
    }

    async fn spawn_server() -> (
        SocketAddr,
        Arc<Aggregator>,
        Arc<HealthMetrics>,
        CancellationToken,
    ) {
        let agg = Arc::new(Aggregator::new());
        let health = Arc::new(HealthMetrics::new("").expect("metrics"));
        let server = Server::bind(
            "127.0.0.1:0".parse().expect("addr"),
            Arc::clone(&agg),
            Arc::clone(&health),
        )
        .await
        .expect("bind");
        let addr = server.local_addr().expect("local addr");

        let ctx = CancellationToken::new();
        tokio::spawn(server.run(ctx.clone()));
        (addr, agg, health, ctx)
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let agg = Arc::new(Aggregator::new());
        let health = Arc::new(HealthMetrics::new("").expect("metrics"));
        let first = Server::bind(
            "127.0.0.1:0".parse().expect("addr"),
            Arc::clone(&agg),
            Arc::clone(&health),
        )
        .await
        .expect("bind");
        let taken = first.local_addr().expect("local addr");

        let err = Server::bind(taken, agg, health)
            .await
            .err()
            .expect("second bind fails");
        assert!(format!("{err:#}").contains("binding listener"));
    }

    #[tokio::test]
    async fn test_connections_feed_aggregator() {
        let (addr, agg, health, ctx) = spawn_server().await;

        let mut a = TcpStream::connect(addr).await.expect("connect");
        let mut b = TcpStream::connect(addr).await.expect("connect");
        a.write_all(b"alice\n").await.expect("write");
        b.write_all(b"bob\n1.0 xyz\n").await.expect("write");

        wait_for_bytes(&agg, 5 + 3 + 3).await;
        let interval = agg.drain();
        assert_eq!(interval.bytes, 11);
        assert_eq!(interval.delays.len(), 1);
        assert_eq!(health.connections_accepted.get(), 2.0);
        assert_eq!(health.accept_errors.get(), 0.0);

        ctx.cancel();
    }

    #[tokio::test]
    async fn test_cancel_stops_accepting() {
        let (addr, _agg, _health, ctx) = spawn_server().await;
        ctx.cancel();

        // The listener is dropped once the loop exits.
        let refused = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if TcpStream::connect(addr).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(refused.is_ok());
    }
}
