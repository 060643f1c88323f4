//! Periodic maintenance: expired-record sweep and refund reconciliation.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::PipelineOrchestrator;

/// Counters reported by a running sweeper.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweeperStats {
    pub passes: u64,
    pub jobs_deleted: u64,
    pub refunds_settled: u64,
    pub errors: u64,
}

/// Handle to a running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl SweeperHandle {
    pub fn stats(&self) -> SweeperStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Stop the loop and wait for the in-flight pass to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                error!(error = %err, "sweeper task panicked");
            }
        }
    }
}

impl PipelineOrchestrator {
    /// Run one sweep and one reconciliation pass.
    pub async fn run_maintenance(&self) -> SweeperStats {
        let mut pass = SweeperStats { passes: 1, ..SweeperStats::default() };
        match self.sweep_expired().await {
            Ok(n) => pass.jobs_deleted = n as u64,
            Err(err) => {
                pass.errors += 1;
                error!(error = %err, "expiry sweep failed");
            }
        }
        match self.reconcile_refunds().await {
            Ok(n) => pass.refunds_settled = n as u64,
            Err(err) => {
                pass.errors += 1;
                error!(error = %err, "refund reconciliation failed");
            }
        }
        pass
    }

    /// Spawn the maintenance loop on the current runtime, ticking every
    /// `sweep_interval`.
    pub fn spawn_expiry_sweeper(&self) -> SweeperHandle {
        self.spawn_sweeper_every(self.config().sweep_interval)
    }

    pub fn spawn_sweeper_every(&self, every: Duration) -> SweeperHandle {
        let (tx, mut rx) = oneshot::channel();
        let stats = Arc::new(Mutex::new(SweeperStats::default()));
        let orchestrator = self.clone();
        let shared = stats.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_ms = every.as_millis() as u64, "sweeper started");

            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = ticker.tick() => {
                        let pass = orchestrator.run_maintenance().await;
                        debug!(
                            deleted = pass.jobs_deleted,
                            settled = pass.refunds_settled,
                            errors = pass.errors,
                            "maintenance pass finished"
                        );
                        let mut total = shared.lock().unwrap_or_else(PoisonError::into_inner);
                        total.passes += 1;
                        total.jobs_deleted += pass.jobs_deleted;
                        total.refunds_settled += pass.refunds_settled;
                        total.errors += pass.errors;
                    }
                }
            }

            info!("sweeper stopped");
        });

        SweeperHandle {
            shutdown: Some(tx),
            join: Some(join),
            stats,
        }
    }
}
