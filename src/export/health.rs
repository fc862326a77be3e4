use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Prometheus metrics for agent health and observability.
///
/// All metrics use the "usboor" namespace. Per-bus series carry a `bus`
/// label so several monitors can share one registry.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Report ticks executed, per bus.
    pub ticks_total: CounterVec,
    /// Capture failures by bus and error type.
    pub capture_errors_total: CounterVec,
    /// Packet records observed, per bus.
    pub packets_observed_total: CounterVec,
    /// Payload bytes observed, per bus.
    pub bytes_observed_total: CounterVec,
    /// Whether the last capture on a bus failed (1=degraded, 0=sampling).
    pub bus_degraded: GaugeVec,
    /// Most recent throughput estimate in bytes per second, per bus.
    pub throughput_bytes: GaugeVec,
    /// Number of running bus monitors.
    pub monitors_running: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    /// The HTTP server is not started until [`HealthMetrics::start`].
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let ticks_total = CounterVec::new(
            Opts::new("ticks_total", "Total report ticks executed per bus.").namespace("usboor"),
            &["bus"],
        )?;
        let capture_errors_total = CounterVec::new(
            Opts::new(
                "capture_errors_total",
                "Total capture failures by bus and error type.",
            )
            .namespace("usboor"),
            &["bus", "error_type"],
        )?;
        let packets_observed_total = CounterVec::new(
            Opts::new(
                "packets_observed_total",
                "Total packet records observed per bus.",
            )
            .namespace("usboor"),
            &["bus"],
        )?;
        let bytes_observed_total = CounterVec::new(
            Opts::new(
                "bytes_observed_total",
                "Total payload bytes observed per bus.",
            )
            .namespace("usboor"),
            &["bus"],
        )?;
        let bus_degraded = GaugeVec::new(
            Opts::new(
                "bus_degraded",
                "Whether the last capture on the bus failed (1=degraded, 0=sampling).",
            )
            .namespace("usboor"),
            &["bus"],
        )?;
        let throughput_bytes = GaugeVec::new(
            Opts::new(
                "throughput_bytes_per_second",
                "Most recent throughput estimate in bytes per second per bus.",
            )
            .namespace("usboor"),
            &["bus"],
        )?;
        let monitors_running = Gauge::with_opts(
            Opts::new("monitors_running", "Number of running bus monitors.").namespace("usboor"),
        )?;

        registry.register(Box::new(ticks_total.clone()))?;
        registry.register(Box::new(capture_errors_total.clone()))?;
        registry.register(Box::new(packets_observed_total.clone()))?;
        registry.register(Box::new(bytes_observed_total.clone()))?;
        registry.register(Box::new(bus_degraded.clone()))?;
        registry.register(Box::new(throughput_bytes.clone()))?;
        registry.register(Box::new(monitors_running.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            ticks_total,
            capture_errors_total,
            packets_observed_total,
            bytes_observed_total,
            bus_degraded,
            throughput_bytes,
            monitors_running,
        })
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let registry = self.registry.clone();
        let app_state = Arc::new(AppState { registry });

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

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "encoding error".to_string(),
        );
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "converting metrics to string");
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
