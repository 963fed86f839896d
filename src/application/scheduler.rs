use super::escrow::{EscrowEngine, ReleaseOutcome};
use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counts of what one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub promoted: usize,
    pub released: usize,
    pub pending_manual: usize,
    pub failed: usize,
    /// Payments another worker claimed first.
    pub skipped: usize,
    pub reconciled: usize,
}

/// Recurring sweep over due holds.
///
/// Holds no state of its own; several schedulers may sweep the same store
/// because every release goes through the engine's compare-and-swap.
pub struct ReleaseScheduler {
    engine: EscrowEngine,
    interval: Duration,
}

impl ReleaseScheduler {
    pub fn new(engine: EscrowEngine, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// One sweep: promote due holds, release everything ready, then resolve
    /// stale releases. A failing payment is logged and the sweep moves on.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        for payment in self.engine.due_payments().await? {
            match self.engine.promote_if_due(payment.id).await {
                Ok(Some(_)) => report.promoted += 1,
                Ok(None) => {}
                Err(e) if e.is_conflict() => {
                    debug!(payment_id = %payment.id, "promotion lost to another worker");
                    report.skipped += 1;
                }
                Err(e) => error!(payment_id = %payment.id, error = %e, "failed to promote payment"),
            }
        }

        for payment in self.engine.ready_payments().await? {
            match self.engine.release(payment.id).await {
                Ok(ReleaseOutcome::Released(_)) => report.released += 1,
                Ok(ReleaseOutcome::PendingManual(_)) => report.pending_manual += 1,
                Ok(ReleaseOutcome::Failed { .. }) => report.failed += 1,
                Err(e) if e.is_conflict() => {
                    debug!(payment_id = %payment.id, "release claimed by another worker");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(payment_id = %payment.id, error = %e, "release failed");
                    report.failed += 1;
                }
            }
        }

        let stale_before = self.engine.now() - self.engine.config().stale_release_after();
        match self.engine.reconcile_releasing(stale_before).await {
            Ok(reconciled) => report.reconciled = reconciled.len(),
            Err(e) => error!(error = %e, "stale release reconciliation failed"),
        }

        match self.engine.overdue_disputes().await {
            Ok(overdue) => {
                for payment in overdue {
                    warn!(
                        payment_id = %payment.id,
                        opened_at = ?payment.dispute_opened_at,
                        "dispute open past its window"
                    );
                }
            }
            Err(e) => error!(error = %e, "failed to list overdue disputes"),
        }

        Ok(report)
    }

    /// Ticks every interval until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval = ?self.interval, "release scheduler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("release scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report != TickReport::default() => {
                            info!(?report, "release sweep finished");
                        }
                        Ok(_) => debug!("release sweep found nothing to do"),
                        Err(e) => error!(error = %e, "release sweep failed"),
                    }
                }
            }
        }
    }
}
