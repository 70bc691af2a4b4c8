//! Timeout reconciliation for bookings whose payment never arrived.

use async_trait::async_trait;
use booking_store::{BookingStore, BookingTransition, UnitOfWork};
use domain::{BookingStatus, PaymentSettlement, PaymentStatus, ReconciliationJob};

use crate::error::Result;

/// What a reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The booking was still pending: it is now failed and its tickets are back.
    Expired,
    /// The booking had already reached this terminal state; nothing changed.
    AlreadyFinalized(BookingStatus),
    /// The booking no longer exists.
    Missing,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::AlreadyFinalized(_) => "already_finalized",
            Self::Missing => "missing",
        }
    }
}

/// Something that processes delivered reconciliation jobs.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Handles one delivery. An error asks the queue to redeliver.
    async fn handle(&self, job: &ReconciliationJob) -> Result<()>;
}

/// Fails bookings still unpaid when their reconciliation job fires.
///
/// Safe under duplicate delivery and under a racing payment update: the
/// payment and booking writes only apply while both are still `Pending`.
#[derive(Clone)]
pub struct ReconciliationWorker<S>
where
    S: BookingStore,
{
    store: S,
}

impl<S> ReconciliationWorker<S>
where
    S: BookingStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, job), fields(booking_id = %job.booking_id))]
    pub async fn reconcile(&self, job: &ReconciliationJob) -> Result<ReconcileOutcome> {
        let outcome = self.try_expire(job).await?;

        metrics::counter!("reconciliations_total", "result" => outcome.as_str()).increment(1);
        match outcome {
            ReconcileOutcome::Expired => {
                tracing::info!(
                    event_id = %job.event_id,
                    quantity = job.quantity.get(),
                    "unpaid booking expired, tickets restored"
                );
            }
            ReconcileOutcome::AlreadyFinalized(status) => {
                tracing::debug!(%status, "booking already finalized");
            }
            ReconcileOutcome::Missing => {
                tracing::warn!("reconciliation job for unknown booking");
            }
        }
        Ok(outcome)
    }

    async fn try_expire(&self, job: &ReconciliationJob) -> Result<ReconcileOutcome> {
        let Some(booking) = self.store.get_booking(job.booking_id).await? else {
            return Ok(ReconcileOutcome::Missing);
        };
        if booking.status.is_terminal() {
            return Ok(ReconcileOutcome::AlreadyFinalized(booking.status));
        }

        // Payment first, then booking: the same order the payment updater
        // takes, so the two never wait on each other's rows.
        let mut tx = self.store.begin().await?;
        let failed = PaymentSettlement::new(PaymentStatus::Failed);
        if !tx.settle_payment(job.payment_id, &failed).await? {
            tx.rollback().await?;
            return self.current_status(job).await;
        }

        let transition = BookingTransition::new(BookingStatus::Failed, PaymentStatus::Failed);
        if !tx.transition_booking(booking.id, &transition).await? {
            tx.rollback().await?;
            return self.current_status(job).await;
        }

        tx.restore_tickets(booking.event_id, booking.quantity).await?;
        tx.commit().await?;
        Ok(ReconcileOutcome::Expired)
    }

    async fn current_status(&self, job: &ReconciliationJob) -> Result<ReconcileOutcome> {
        Ok(match self.store.get_booking(job.booking_id).await? {
            Some(booking) => ReconcileOutcome::AlreadyFinalized(booking.status),
            None => ReconcileOutcome::Missing,
        })
    }
}

#[async_trait]
impl<S> JobHandler for ReconciliationWorker<S>
where
    S: BookingStore,
{
    async fn handle(&self, job: &ReconciliationJob) -> Result<()> {
        self.reconcile(job).await.map(|_| ())
    }
}
