use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "delaymeter";

/// Record kinds used as the `kind` label of `records_total`.
pub const RECORD_CONNECT: &str = "connect";
pub const RECORD_EVENT: &str = "event";
pub const RECORD_IGNORED: &str = "ignored";

/// Prometheus metrics for collector health.
///
/// These counters are independent of interval accounting: they are never
/// reset by a drain and never read by the flush path.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Total TCP connections accepted.
    pub connections_accepted: Counter,
    /// Connections currently being ingested.
    pub connections_active: Gauge,
    /// Failed accept calls.
    pub accept_errors: Counter,
    /// Connections terminated by a read error.
    pub read_errors: Counter,
    /// Parsed records by kind (connect/event/ignored).
    pub records: CounterVec,
    /// Event records whose origin timestamp was not a number.
    pub timestamp_parse_errors: Counter,
    /// Lines discarded for exceeding the configured maximum length.
    pub oversized_lines: Counter,
    /// Completed drain-and-export cycles.
    pub flushes: Counter,
    /// Time spent exporting one drained interval.
    pub flush_duration: Histogram,
    /// Export failures by exporter.
    pub export_errors: CounterVec,
    /// Byte total of the most recently flushed interval.
    pub last_interval_bytes: Gauge,
    /// Sample count of the most recently flushed interval.
    pub last_interval_delays: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    ///
    /// An empty `addr` keeps the metrics in-process only; `start` is then a no-op.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let connections_accepted = Counter::with_opts(
            Opts::new(
                "connections_accepted_total",
                "Total TCP connections accepted.",
            )
            .namespace(NAMESPACE),
        )?;
        let connections_active = Gauge::with_opts(
            Opts::new(
                "connections_active",
                "Connections currently being ingested.",
            )
            .namespace(NAMESPACE),
        )?;
        let accept_errors = Counter::with_opts(
            Opts::new("accept_errors_total", "Total failed accept calls.").namespace(NAMESPACE),
        )?;
        let read_errors = Counter::with_opts(
            Opts::new(
                "read_errors_total",
                "Connections terminated by a read error.",
            )
            .namespace(NAMESPACE),
        )?;
        let records = CounterVec::new(
            Opts::new("records_total", "Parsed records by kind.").namespace(NAMESPACE),
            &["kind"],
        )?;
        let timestamp_parse_errors = Counter::with_opts(
            Opts::new(
                "timestamp_parse_errors_total",
                "Event records with a non-numeric origin timestamp.",
            )
            .namespace(NAMESPACE),
        )?;
        let oversized_lines = Counter::with_opts(
            Opts::new(
                "oversized_lines_total",
                "Lines discarded for exceeding the maximum length.",
            )
            .namespace(NAMESPACE),
        )?;
        let flushes = Counter::with_opts(
            Opts::new("flushes_total", "Completed drain-and-export cycles.").namespace(NAMESPACE),
        )?;
        let flush_duration = Histogram::with_opts(
            HistogramOpts::new(
                "flush_duration_seconds",
                "Time to export one drained interval to all exporters.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
            ]),
        )?;
        let export_errors = CounterVec::new(
            Opts::new("export_errors_total", "Export failures by exporter.").namespace(NAMESPACE),
            &["exporter"],
        )?;
        let last_interval_bytes = Gauge::with_opts(
            Opts::new(
                "last_interval_bytes",
                "Byte total of the most recently flushed interval.",
            )
            .namespace(NAMESPACE),
        )?;
        let last_interval_delays = Gauge::with_opts(
            Opts::new(
                "last_interval_delays",
                "Delay sample count of the most recently flushed interval.",
            )
            .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(connections_accepted.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(accept_errors.clone()))?;
        registry.register(Box::new(read_errors.clone()))?;
        registry.register(Box::new(records.clone()))?;
        registry.register(Box::new(timestamp_parse_errors.clone()))?;
        registry.register(Box::new(oversized_lines.clone()))?;
        registry.register(Box::new(flushes.clone()))?;
        registry.register(Box::new(flush_duration.clone()))?;
        registry.register(Box::new(export_errors.clone()))?;
        registry.register(Box::new(last_interval_bytes.clone()))?;
        registry.register(Box::new(last_interval_delays.clone()))?;

        Ok(Self {
            registry,
            addr: addr.trim().to_string(),
            shutdown: parking_lot::Mutex::new(None),
            connections_accepted,
            connections_active,
            accept_errors,
            read_errors,
            records,
            timestamp_parse_errors,
            oversized_lines,
            flushes,
            flush_duration,
            export_errors,
            last_interval_bytes,
            last_interval_delays,
        })
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    ///
    /// Returns the bound address, or `None` if no address is configured.
    pub async fn start(&self) -> Result<Option<SocketAddr>> {
        if self.addr.is_empty() {
            return Ok(None);
        }

        // Parse address, handling ":port" shorthand.
        let bind_addr = if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(Some(local_addr))
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }

    /// Renders all metrics in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        encode_registry(&self.registry)
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

fn encode_registry(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("encoding metrics")?;

    String::from_utf8(buffer).context("converting metrics to string")
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode_registry(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "rendering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
