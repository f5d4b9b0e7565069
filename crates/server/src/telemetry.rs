//! Tracing subscriber and Prometheus recorder set-up.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogFormat;
use crate::error::ServerError;

/// Installs the global tracing subscriber. Filter comes from `RUST_LOG`,
/// defaulting to `info`.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Installs the Prometheus recorder and serves the scrape endpoint on `addr`.
///
/// Must be called from inside a tokio runtime.
pub fn install_metrics(addr: SocketAddr) -> Result<(), ServerError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}

fn describe_metrics() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!("orders_placed_total", "Orders placed and awaiting payment");
    describe_counter!("orders_failed_total", "Placements rejected for insufficient stock");
    describe_counter!("orders_paid_total", "Orders paid with stock committed");
    describe_counter!("orders_cancelled_total", "Orders cancelled by their owner");
    describe_counter!("orders_expired_total", "Pending orders cancelled after their payment window");
    describe_counter!(
        "orders_reconciliation_total",
        "Captured payments that need manual reconciliation"
    );
    describe_counter!("payment_attempts_total", "Gateway charge attempts, retries included");
    describe_histogram!("payment_duration_seconds", "Latency of a single gateway charge");
    describe_counter!("stock_reservations_total", "Successful stock reservations");
    describe_counter!(
        "stock_reservation_conflicts_total",
        "Reservations refused for insufficient stock"
    );
    describe_counter!("sweeper_runs_total", "Expiry sweeps started");
}
