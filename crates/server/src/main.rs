//! Server entry point.

use server::{Config, telemetry};
use store::InMemoryStore;
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration
    let config = Config::from_env().expect("invalid configuration");

    // 2. Initialize tracing
    telemetry::init_tracing(config.log_format);

    // 3. Install Prometheus metrics recorder
    telemetry::install_metrics(config.metrics_addr)
        .expect("failed to install Prometheus recorder");

    // 4. Pick the store and run until shutdown
    let result = match config.database_url.as_deref() {
        Some(url) => {
            let store = server::connect_postgres(url, config.database_max_connections)
                .await
                .expect("failed to connect to database");
            server::run(server::build_orchestrator(store, &config), &config, shutdown_signal())
                .await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            let store = InMemoryStore::new();
            server::run(server::build_orchestrator(store, &config), &config, shutdown_signal())
                .await
        }
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "server stopped with error");
        std::process::exit(1);
    }
    tracing::info!("server shut down gracefully");
}
