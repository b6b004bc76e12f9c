use crate::error::RealtimeError;
use anyhow::Result;
use metrics::{Counter, Gauge, counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, sync::LazyLock};
use tracing::{error, info};

// Global metrics
pub static FRAMES_RECEIVED_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("inbox_frames_received_total"));
pub static DECODE_ERROR_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("inbox_decode_errors_total"));
pub static EVENTS_DISPATCHED_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("inbox_events_dispatched_total"));
pub static LISTENER_FAILURE_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("inbox_listener_failures_total"));
pub static RECONNECT_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("inbox_reconnects_total"));
pub static CONNECTED_GAUGE: LazyLock<Gauge> = LazyLock::new(|| gauge!("inbox_connected"));
pub static UNREAD_GAUGE: LazyLock<Gauge> =
    LazyLock::new(|| gauge!("inbox_unread_notifications"));

pub async fn setup_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    let builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", "inbox-realtime")
        .add_global_label("version", env!("CARGO_PKG_VERSION"));

    match builder.install() {
        Ok(_) => {
            info!(
                "Prometheus metrics server started on http://{}/metrics",
                addr
            );

            // Initialize metrics with default values
            FRAMES_RECEIVED_COUNTER.absolute(0);
            DECODE_ERROR_COUNTER.absolute(0);
            EVENTS_DISPATCHED_COUNTER.absolute(0);
            LISTENER_FAILURE_COUNTER.absolute(0);
            RECONNECT_COUNTER.absolute(0);
            CONNECTED_GAUGE.set(0.0);
            UNREAD_GAUGE.set(0.0);

            Ok(())
        }
        Err(e) => {
            error!("Failed to start metrics server: {}", e);
            Err(RealtimeError::MetricsError(e.to_string()).into())
        }
    }
}
