//! Periodic evaluation scheduler.

use crate::evaluator::Evaluator;
use std::sync::Arc;
use tokio::sync::Semaphore;
use vigil_store::AlertSource;

/// Ticks on a fixed cadence and fans each enabled alert out to the worker
/// pool. Passes are spawned detached so a slow pass never delays the
/// ticker; overlapping passes are tolerated because evaluation is
/// idempotent per evaluation minute.
pub struct AlertScheduler {
    alerts: Arc<dyn AlertSource>,
    evaluator: Arc<Evaluator>,
    tick: std::time::Duration,
    workers: Arc<Semaphore>,
}

impl AlertScheduler {
    pub fn new(
        alerts: Arc<dyn AlertSource>,
        evaluator: Arc<Evaluator>,
        tick_secs: u64,
        max_concurrent: usize,
    ) -> Self {
        Self {
            alerts,
            evaluator,
            tick: std::time::Duration::from_secs(tick_secs.max(1)),
            workers: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Runs forever. The first pass starts immediately.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(tick_secs = self.tick.as_secs(), "Starting metric alert scheduler");
        let mut ticker = tokio::time::interval(self.tick);
        loop {
            ticker.tick().await;
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move {
                scheduler.run_pass().await;
            });
        }
    }

    /// One full pass over the enabled alerts. Waits for every evaluation
    /// it spawned; a panicked or failed evaluation is logged and does not
    /// affect the others.
    pub async fn run_pass(&self) {
        let alerts = match self.alerts.list_enabled_alerts() {
            Ok(alerts) => alerts,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list alert definitions");
                return;
            }
        };
        tracing::info!(count = alerts.len(), "Processing metric alerts");

        let mut handles = Vec::with_capacity(alerts.len());
        for alert in alerts {
            let permit = match Arc::clone(&self.workers).acquire_owned().await {
                Ok(permit) => permit,
                // Closed semaphore means shutdown.
                Err(_) => return,
            };
            let evaluator = Arc::clone(&self.evaluator);
            handles.push(tokio::spawn(async move {
                let result = evaluator.evaluate_alert(&alert).await;
                drop(permit);
                (alert.id, result)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((alert_id, Err(e))) => {
                    tracing::error!(alert_id, error = %e, "Alert evaluation failed");
                }
                Ok((_, Ok(()))) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Alert evaluation task panicked");
                }
            }
        }
    }
}
