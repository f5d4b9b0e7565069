//! Background expiry of pending orders that were never paid.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use store::Store;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::orchestrator::OrderOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Payment window of a pending order.
    pub timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    /// Still inside the window, or no longer pending by the time it was locked.
    pub skipped: usize,
    pub failed: usize,
}

/// Periodically cancels pending orders older than the payment window.
///
/// Each order is expired in its own transaction; a failure on one order is
/// logged and the sweep moves on.
pub struct ExpirySweeper<S: Store> {
    orchestrator: Arc<OrderOrchestrator<S>>,
    config: SweeperConfig,
}

impl<S: Store> ExpirySweeper<S> {
    pub fn new(orchestrator: Arc<OrderOrchestrator<S>>, config: SweeperConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub fn config(&self) -> SweeperConfig {
        self.config
    }

    /// Runs one sweep over every pending order.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> Result<SweepReport> {
        metrics::counter!("sweeper_runs_total").increment(1);
        let pending = self.orchestrator.pending_order_ids().await?;

        let mut report = SweepReport {
            examined: pending.len(),
            ..SweepReport::default()
        };
        for order_id in pending {
            let outcome = self
                .orchestrator
                .auto_cancel_pending_order(order_id, self.config.timeout)
                .await;
            if outcome.success {
                report.expired += 1;
            } else if outcome.error.is_some() {
                tracing::error!(%order_id, message = %outcome.message, "failed to expire order");
                report.failed += 1;
            } else {
                report.skipped += 1;
            }
        }

        if report.expired > 0 || report.failed > 0 {
            tracing::info!(
                examined = report.examined,
                expired = report.expired,
                failed = report.failed,
                "expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweeps on every interval until `shutdown` resolves.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            timeout_secs = self.config.timeout.as_secs(),
            "expiry sweeper started"
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "expiry sweep failed");
                    }
                }
            }
        }
        tracing::info!("expiry sweeper stopped");
    }

    /// Runs the sweeper as a background task.
    pub fn spawn(self, shutdown: impl Future<Output = ()> + Send + 'static) -> JoinHandle<()> {
        tokio::spawn(self.run_until(shutdown))
    }
}
