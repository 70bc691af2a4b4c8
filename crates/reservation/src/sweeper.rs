//! Periodic maintenance: event lifecycle and unmonitored bookings.

use std::time::Duration;

use booking_store::BookingStore;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::runner::WorkerHandle;
use crate::worker::{ReconcileOutcome, ReconciliationWorker};

/// Settings for [`Sweeper`].
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// Extra time past the reconciliation delay before a pending booking is
    /// considered unmonitored.
    pub grace: Duration,
    /// Maximum stale bookings reconciled per pass.
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            grace: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub events_deactivated: usize,
    pub bookings_expired: usize,
}

/// Deactivates events that have started and fails pending bookings whose
/// reconciliation job was never delivered.
pub struct Sweeper<S>
where
    S: BookingStore,
{
    store: S,
    worker: ReconciliationWorker<S>,
    reconciliation_delay: Duration,
    config: SweeperConfig,
}

impl<S> Sweeper<S>
where
    S: BookingStore + Clone + 'static,
{
    pub fn new(store: S, reconciliation_delay: Duration, config: SweeperConfig) -> Self {
        Self {
            worker: ReconciliationWorker::new(store.clone()),
            store,
            reconciliation_delay,
            config,
        }
    }

    /// Runs one pass.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        let deactivated = self.store.deactivate_started_events(now).await?;
        for event_id in &deactivated {
            tracing::info!(%event_id, "event started, reservations closed");
        }
        report.events_deactivated = deactivated.len();

        let cutoff = self.stale_cutoff(now);
        let stale = self
            .store
            .stale_pending_bookings(cutoff, self.config.batch_size)
            .await?;
        for job in &stale {
            match self.worker.reconcile(job).await {
                Ok(ReconcileOutcome::Expired) => {
                    report.bookings_expired += 1;
                    tracing::warn!(booking_id = %job.booking_id, "unmonitored booking expired by sweeper");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(booking_id = %job.booking_id, error = %e, "sweeper reconciliation failed");
                }
            }
        }

        Ok(report)
    }

    /// Pending bookings created before this instant have outlived their job.
    fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let cap = chrono::Duration::weeks(52 * 100);
        let window = self.reconciliation_delay.saturating_add(self.config.grace);
        let window = chrono::Duration::from_std(window).map_or(cap, |w| w.min(cap));
        now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Starts sweeping on the current tokio runtime.
    pub fn start(self) -> WorkerHandle {
        let interval = self.config.interval;
        let sweeper = std::sync::Arc::new(self);
        WorkerHandle::spawn("sweeper", interval, move || {
            let sweeper = std::sync::Arc::clone(&sweeper);
            async move {
                if let Err(e) = sweeper.sweep().await {
                    tracing::warn!(error = %e, "sweep failed");
                }
            }
        })
    }
}
