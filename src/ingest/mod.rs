pub mod parse;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::clock::{self, NowFn};
use crate::export::health::{HealthMetrics, RECORD_CONNECT, RECORD_EVENT, RECORD_IGNORED};
use crate::sink::aggregated::Aggregator;

use self::parse::{parse_record, Record};

/// Default longest accepted line in bytes, excluding the newline.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Processes the record stream of a single producer connection.
///
/// Node identity is local to the connection; the only shared state an
/// ingestor touches is the aggregator.
pub struct Ingestor {
    aggregator: Arc<Aggregator>,
    health: Arc<HealthMetrics>,
    peer: Option<SocketAddr>,
    connected_at: f64,
    max_line_bytes: usize,
    now: NowFn,
    node: Option<String>,
}

impl Ingestor {
    /// Creates an ingestor for a connection accepted at `connected_at`
    /// (float Unix-epoch seconds).
    pub fn new(aggregator: Arc<Aggregator>, health: Arc<HealthMetrics>, connected_at: f64) -> Self {
        Self {
            aggregator,
            health,
            peer: None,
            connected_at,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            now: clock::now_unix_secs,
            node: None,
        }
    }

    /// Sets the peer address used in log lines.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Sets the longest accepted line, excluding the newline.
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    /// Replaces the wall clock used for latency computation.
    pub fn with_clock(mut self, now: NowFn) -> Self {
        self.now = now;
        self
    }

    /// Node identity announced on this connection, if any.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    fn node_label(&self) -> &str {
        self.node.as_deref().unwrap_or("")
    }

    /// Reads records until end-of-stream.
    ///
    /// Returns `Ok` on a clean close and the read error otherwise. Either way
    /// the connection is finished.
    pub async fn run<R>(mut self, reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        self.health.connections_active.inc();
        let result = self.read_loop(BufReader::new(reader)).await;
        self.health.connections_active.dec();

        match &result {
            Ok(()) => {
                info!(
                    disconnected_at = (self.now)(),
                    node = self.node_label(),
                    "node disconnected",
                );
            }
            Err(_) => self.health.read_errors.inc(),
        }

        result
    }

    async fn read_loop<R>(&mut self, mut reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let limit = self.max_line_bytes as u64 + 1;
        let mut buf = Vec::with_capacity(256);

        loop {
            buf.clear();
            let n = (&mut reader)
                .take(limit)
                .read_until(b'\n', &mut buf)
                .await
                .context("reading record")?;

            if n == 0 {
                return Ok(());
            }

            if buf.last() != Some(&b'\n') && n as u64 == limit {
                discard_line(&mut reader)
                    .await
                    .context("discarding oversized record")?;
                self.health.oversized_lines.inc();
                warn!(
                    peer = ?self.peer,
                    node = self.node_label(),
                    max_line_bytes = self.max_line_bytes,
                    "discarded oversized record",
                );
                continue;
            }

            let line = String::from_utf8_lossy(&buf);
            self.handle_line(&line);
        }
    }

    /// Parses one line and applies its contribution to the aggregator.
    pub fn handle_line(&mut self, line: &str) {
        let now = (self.now)();
        let record = parse_record(line);

        match &record {
            Record::Connect { node } => {
                self.node = Some((*node).to_string());
                self.health
                    .records
                    .with_label_values(&[RECORD_CONNECT])
                    .inc();
                info!(
                    connected_at = self.connected_at,
                    node = *node,
                    peer = ?self.peer,
                    "node connected",
                );
            }
            Record::Event {
                raw_origin,
                origin,
                payload,
            } => {
                if let Err(e) = origin {
                    self.health.timestamp_parse_errors.inc();
                    warn!(error = %e, node = self.node_label(), "bad event timestamp");
                }
                self.health.records.with_label_values(&[RECORD_EVENT]).inc();
                info!(
                    origin = *raw_origin,
                    node = self.node_label(),
                    payload = *payload,
                    "event",
                );
            }
            Record::Ignored { fields } => {
                self.health
                    .records
                    .with_label_values(&[RECORD_IGNORED])
                    .inc();
                debug!(fields = *fields, node = self.node_label(), "ignoring record");
            }
        }

        if let Some(contribution) = record.contribution(now) {
            self.aggregator.record(contribution);
        }
    }
}

/// Consumes input up to and including the next newline (or end-of-stream)
/// without buffering it.
async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (found, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (true, i + 1),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        if found {
            return Ok(());
        }
    }
}
