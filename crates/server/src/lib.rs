//! Process host for the order core.
//!
//! Wires configuration, telemetry and the data store into an
//! [`OrderOrchestrator`] and keeps the [`ExpirySweeper`] running until
//! shutdown. HTTP routing is left to the embedding application; the only
//! listener this process opens is the Prometheus scrape endpoint.

pub mod config;
pub mod error;
pub mod telemetry;

use std::future::Future;
use std::sync::Arc;

use orchestrator::{ExpirySweeper, OrderOrchestrator, PaymentGateways};
use sqlx::postgres::PgPoolOptions;
use store::{PostgresStore, Store};

pub use config::{Config, LogFormat};
pub use error::{ConfigError, ServerError};

/// Builds the orchestrator with the simulated payment gateways.
pub fn build_orchestrator<S: Store>(store: S, config: &Config) -> Arc<OrderOrchestrator<S>> {
    Arc::new(OrderOrchestrator::new(
        store,
        PaymentGateways::simulated(),
        config.orchestrator(),
    ))
}

/// Connects to Postgres and applies pending migrations.
pub async fn connect_postgres(url: &str, max_connections: u32) -> Result<PostgresStore, ServerError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    let store = PostgresStore::new(pool);
    store.run_migrations().await?;
    tracing::info!(max_connections, "connected to postgres, migrations applied");
    Ok(store)
}

/// Runs the expiry sweeper against `orchestrator` until `shutdown` resolves.
pub async fn run<S: Store>(
    orchestrator: Arc<OrderOrchestrator<S>>,
    config: &Config,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let pending = orchestrator.pending_order_ids().await?;
    tracing::info!(
        pending_orders = pending.len(),
        timeout_secs = config.pending_order_timeout.as_secs(),
        "order core ready"
    );

    ExpirySweeper::new(orchestrator, config.sweeper())
        .spawn(shutdown)
        .await?;
    Ok(())
}
