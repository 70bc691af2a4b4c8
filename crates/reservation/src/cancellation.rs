//! User-initiated cancellation of pending bookings.

use booking_store::{BookingStore, BookingTransition, UnitOfWork};
use common::{BookingId, UserId};
use domain::{
    Booking, BookingStatus, PaymentSettlement, PaymentStatus, normalize_cancellation_reason,
};

use crate::coordinator::ReservationCoordinator;
use crate::error::{ReservationError, Result};

impl<S> ReservationCoordinator<S>
where
    S: BookingStore,
{
    /// Cancels a pending booking on behalf of its owner and releases its tickets.
    ///
    /// Bookings owned by someone else are reported as not found.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel_booking(
        &self,
        booking_id: BookingId,
        user_id: UserId,
        reason: Option<&str>,
    ) -> Result<Booking> {
        let reason = normalize_cancellation_reason(reason)?;

        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .filter(|b| b.user_id == user_id)
            .ok_or_else(|| ReservationError::not_found("booking", booking_id))?;
        if booking.status != BookingStatus::Pending {
            return Err(ReservationError::Conflict(format!(
                "booking is {} and can no longer be cancelled",
                booking.status
            )));
        }
        let payment = self.store.find_payment_by_booking(booking_id).await?;

        let mut tx = self.store.begin().await?;
        if let Some(payment) = &payment {
            let failed = PaymentSettlement::new(PaymentStatus::Failed);
            if !tx.settle_payment(payment.id, &failed).await? {
                tx.rollback().await?;
                return Err(ReservationError::Conflict(
                    "payment already settled".to_string(),
                ));
            }
        }
        let transition = BookingTransition::new(BookingStatus::Cancelled, PaymentStatus::Failed)
            .with_reason(reason);
        if !tx.transition_booking(booking_id, &transition).await? {
            tx.rollback().await?;
            return Err(ReservationError::Conflict(
                "booking is no longer pending".to_string(),
            ));
        }
        tx.restore_tickets(booking.event_id, booking.quantity).await?;
        tx.commit().await?;

        metrics::counter!("bookings_cancelled_total").increment(1);
        tracing::info!(event_id = %booking.event_id, quantity = booking.quantity.get(), "booking cancelled");

        self.store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| ReservationError::not_found("booking", booking_id))
    }
}
