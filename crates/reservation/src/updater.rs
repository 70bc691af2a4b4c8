//! Applies gateway-confirmed payment outcomes to payments and bookings.

use std::sync::Arc;

use booking_store::{BookingStore, BookingTransition, UnitOfWork};
use domain::{PaymentOutcome, PaymentSettlement, PaymentStatus};

use crate::error::{ReservationError, Result};
use crate::gateway::PaymentGateway;

/// Result of applying a payment outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The payment moved out of `Pending` with this call.
    Applied,
    /// The payment had already settled; nothing changed.
    AlreadySettled(PaymentStatus),
}

/// Settles payments idempotently.
///
/// Every write is conditional on the payment still being `Pending`, so
/// redelivered callbacks and a racing reconciliation never restore
/// inventory twice.
pub struct PaymentStatusUpdater<S>
where
    S: BookingStore,
{
    store: S,
    gateway: Arc<dyn PaymentGateway>,
}

impl<S> PaymentStatusUpdater<S>
where
    S: BookingStore,
{
    pub fn new(store: S, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Applies a gateway outcome to the payment for `order_id` and its booking.
    #[tracing::instrument(skip(self, outcome, signature), fields(outcome = outcome.as_str()))]
    pub async fn apply_outcome(
        &self,
        order_id: &str,
        outcome: PaymentOutcome,
        gateway_payment_id: Option<String>,
        signature: Option<String>,
    ) -> Result<Ack> {
        let payment = self
            .store
            .find_payment_by_order(order_id)
            .await?
            .ok_or_else(|| ReservationError::not_found("payment", order_id))?;

        if payment.payment_status.is_settled() {
            return Ok(self.noop(payment.payment_status));
        }

        let booking = self
            .store
            .get_booking(payment.booking_id)
            .await?
            .ok_or_else(|| ReservationError::not_found("booking", payment.booking_id))?;

        let mut tx = self.store.begin().await?;

        let settlement = PaymentSettlement::new(outcome.payment_status())
            .with_gateway_details(gateway_payment_id, signature);
        if !tx.settle_payment(payment.id, &settlement).await? {
            // Settled by someone else between the read and the write.
            tx.rollback().await?;
            let current = self
                .store
                .get_payment(payment.id)
                .await?
                .map_or(outcome.payment_status(), |p| p.payment_status);
            return Ok(self.noop(current));
        }

        let transition = BookingTransition::new(outcome.booking_status(), outcome.payment_status());
        let transitioned = tx.transition_booking(booking.id, &transition).await?;
        if transitioned && outcome.releases_inventory() {
            tx.restore_tickets(booking.event_id, booking.quantity).await?;
        }
        tx.commit().await?;

        if !transitioned {
            tracing::warn!(booking_id = %booking.id, "payment settled for a booking that was no longer pending");
        }
        metrics::counter!("payment_outcomes_total", "outcome" => outcome.as_str()).increment(1);
        tracing::info!(
            booking_id = %booking.id,
            status = %outcome.booking_status(),
            "payment outcome applied"
        );
        Ok(Ack::Applied)
    }

    /// Verifies the client-reported payment signature and settles accordingly.
    ///
    /// A bad signature fails the payment and returns
    /// [`ReservationError::Signature`].
    #[tracing::instrument(skip(self, signature))]
    pub async fn verify_payment(
        &self,
        order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<Ack> {
        if self
            .gateway
            .verify_signature(order_id, gateway_payment_id, signature)
        {
            return self
                .apply_outcome(
                    order_id,
                    PaymentOutcome::Completed,
                    Some(gateway_payment_id.to_string()),
                    Some(signature.to_string()),
                )
                .await;
        }

        tracing::warn!("payment signature mismatch");
        self.apply_outcome(
            order_id,
            PaymentOutcome::Failed,
            Some(gateway_payment_id.to_string()),
            None,
        )
        .await?;
        Err(ReservationError::Signature)
    }

    fn noop(&self, current: PaymentStatus) -> Ack {
        metrics::counter!("payment_outcomes_noop_total").increment(1);
        tracing::warn!(status = %current, "payment already settled, outcome ignored");
        Ack::AlreadySettled(current)
    }
}

#[cfg(test)]
mod tests {
    use booking_store::{InMemoryBookingStore, InMemoryDelayedQueue};
    use chrono::{Duration, Utc};
    use common::UserId;
    use domain::{BookingRequest, BookingStatus, Event, Money, PaymentMethod, Quantity};

    use super::*;
    use crate::config::ReservationConfig;
    use crate::coordinator::{Reservation, ReservationCoordinator};
    use crate::gateway::InMemoryPaymentGateway;

    struct Fixture {
        store: InMemoryBookingStore,
        gateway: InMemoryPaymentGateway,
        updater: PaymentStatusUpdater<InMemoryBookingStore>,
        event: Event,
        reservation: Reservation,
    }

    async fn reserved(quantity: u32) -> Fixture {
        let store = InMemoryBookingStore::new();
        let gateway = InMemoryPaymentGateway::new("key_secret");
        let coordinator = ReservationCoordinator::new(
            store.clone(),
            Arc::new(gateway.clone()),
            Arc::new(InMemoryDelayedQueue::default()),
            ReservationConfig::default(),
        );
        let event = coordinator
            .create_event(
                Event::new(
                    "Comedy Hour",
                    Money::from_cents(800),
                    5,
                    Utc::now() + Duration::days(1),
                )
                .unwrap(),
            )
            .await
            .unwrap();
        let request = BookingRequest::new(
            event.id,
            UserId::new(),
            Quantity::new(quantity).unwrap(),
            vec![],
            PaymentMethod::DebitCard,
        )
        .unwrap();
        let reservation = coordinator.create_booking(request).await.unwrap();
        let updater = PaymentStatusUpdater::new(store.clone(), Arc::new(gateway.clone()));
        Fixture {
            store,
            gateway,
            updater,
            event,
            reservation,
        }
    }

    #[tokio::test]
    async fn test_completed_confirms_without_touching_inventory() {
        let f = reserved(2).await;
        let order_id = &f.reservation.order.order_id;

        let ack = f
            .updater
            .apply_outcome(order_id, PaymentOutcome::Completed, Some("pay_1".into()), None)
            .await
            .unwrap();
        assert_eq!(ack, Ack::Applied);

        let booking = f.store.get_booking(f.reservation.booking.id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.payment_status, PaymentStatus::Completed);
        let payment = f.store.get_payment(f.reservation.payment.id).await.unwrap().unwrap();
        assert_eq!(payment.gateway_payment_id.as_deref(), Some("pay_1"));
        assert_eq!(f.store.available_tickets(f.event.id).await, Some(3));
        assert_eq!(f.store.restore_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_restores_once() {
        let f = reserved(2).await;
        let order_id = &f.reservation.order.order_id;

        f.updater
            .apply_outcome(order_id, PaymentOutcome::Failed, None, None)
            .await
            .unwrap();
        let second = f
            .updater
            .apply_outcome(order_id, PaymentOutcome::Failed, None, None)
            .await
            .unwrap();

        assert_eq!(second, Ack::AlreadySettled(PaymentStatus::Failed));
        assert_eq!(f.store.available_tickets(f.event.id).await, Some(5));
        assert_eq!(f.store.restore_count().await, 1);
    }

    #[tokio::test]
    async fn test_late_failure_after_completion_is_ignored() {
        let f = reserved(1).await;
        let order_id = &f.reservation.order.order_id;

        f.updater
            .apply_outcome(order_id, PaymentOutcome::Completed, None, None)
            .await
            .unwrap();
        let ack = f
            .updater
            .apply_outcome(order_id, PaymentOutcome::Failed, None, None)
            .await
            .unwrap();

        assert_eq!(ack, Ack::AlreadySettled(PaymentStatus::Completed));
        let booking = f.store.get_booking(f.reservation.booking.id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(f.store.available_tickets(f.event.id).await, Some(4));
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let f = reserved(1).await;
        let result = f
            .updater
            .apply_outcome("order_9999", PaymentOutcome::Completed, None, None)
            .await;
        assert!(matches!(
            result,
            Err(ReservationError::NotFound { entity: "payment", .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_payment_with_valid_signature() {
        let f = reserved(1).await;
        let order_id = f.reservation.order.order_id.clone();
        let signature = f.gateway.sign_payment(&order_id, "pay_77");

        let ack = f
            .updater
            .verify_payment(&order_id, "pay_77", &signature)
            .await
            .unwrap();
        assert_eq!(ack, Ack::Applied);

        let payment = f.store.get_payment(f.reservation.payment.id).await.unwrap().unwrap();
        assert_eq!(payment.payment_status, PaymentStatus::Completed);
        assert_eq!(payment.gateway_signature.as_deref(), Some(signature.as_str()));
    }

    #[tokio::test]
    async fn test_verify_payment_with_bad_signature_fails_booking() {
        let f = reserved(2).await;
        let order_id = f.reservation.order.order_id.clone();

        let result = f.updater.verify_payment(&order_id, "pay_77", "deadbeef").await;
        assert!(matches!(result, Err(ReservationError::Signature)));

        let booking = f.store.get_booking(f.reservation.booking.id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Failed);
        assert_eq!(f.store.available_tickets(f.event.id).await, Some(5));

        // A retry with the right signature cannot resurrect the booking.
        let signature = f.gateway.sign_payment(&order_id, "pay_77");
        let ack = f
            .updater
            .verify_payment(&order_id, "pay_77", &signature)
            .await
            .unwrap();
        assert_eq!(ack, Ack::AlreadySettled(PaymentStatus::Failed));
        assert_eq!(f.store.available_tickets(f.event.id).await, Some(5));
    }
}
