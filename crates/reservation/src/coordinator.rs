//! Reservation coordinator: the atomic reserve + order + record step.

use std::sync::Arc;

use booking_store::{
    BookingQuery, BookingStore, DelayedQueue, JobHandle, Page, ReserveOutcome, UnitOfWork,
};
use chrono::Utc;
use common::{BookingId, EventId};
use domain::{Booking, BookingRequest, Event, Payment, ReconciliationJob};

use crate::config::ReservationConfig;
use crate::error::{ReservationError, Result};
use crate::gateway::{GatewayOrder, PaymentGateway};

/// A committed reservation.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub booking: Booking,
    pub payment: Payment,
    pub order: GatewayOrder,
    /// The scheduled timeout check, or `None` if enqueueing failed and the
    /// booking is left to the sweeper.
    pub reconciliation: Option<JobHandle>,
}

/// A booking together with its payment record.
#[derive(Debug, Clone)]
pub struct BookingView {
    pub booking: Booking,
    pub payment: Option<Payment>,
}

/// Orchestrates ticket reservations.
///
/// Inventory decrement, booking insert, gateway order and payment insert
/// commit together or not at all. The reconciliation job is scheduled only
/// after commit.
pub struct ReservationCoordinator<S>
where
    S: BookingStore,
{
    pub(crate) store: S,
    gateway: Arc<dyn PaymentGateway>,
    queue: Arc<dyn DelayedQueue>,
    config: ReservationConfig,
}

impl<S> ReservationCoordinator<S>
where
    S: BookingStore,
{
    /// Creates a new reservation coordinator.
    pub fn new(
        store: S,
        gateway: Arc<dyn PaymentGateway>,
        queue: Arc<dyn DelayedQueue>,
        config: ReservationConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &ReservationConfig {
        &self.config
    }

    /// Reserves tickets and opens a payment order for them.
    ///
    /// On success the booking is `Pending` and a reconciliation job fires
    /// after the configured delay. Failures leave no booking, payment or
    /// inventory change behind.
    #[tracing::instrument(
        skip(self, request),
        fields(event_id = %request.event_id, user_id = %request.user_id, quantity = request.quantity.get())
    )]
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Reservation> {
        metrics::counter!("reservations_total").increment(1);
        let start = std::time::Instant::now();

        let result = self.reserve(&request).await;
        metrics::histogram!("reservation_duration_seconds").record(start.elapsed().as_secs_f64());

        let (booking, payment, order) = match result {
            Ok(reserved) => reserved,
            Err(e) => {
                metrics::counter!("reservations_failed_total", "reason" => e.kind()).increment(1);
                tracing::info!(error = %e, "reservation refused");
                return Err(e);
            }
        };

        tracing::info!(
            booking_id = %booking.id,
            order_id = %order.order_id,
            total = booking.total_price.cents(),
            "booking reserved"
        );

        let reconciliation = self.schedule_reconciliation(&booking, &payment).await;

        Ok(Reservation {
            booking,
            payment,
            order,
            reconciliation,
        })
    }

    async fn reserve(&self, request: &BookingRequest) -> Result<(Booking, Payment, GatewayOrder)> {
        self.price_request(request).await?;

        // Dropping `tx` on any early return rolls the unit of work back.
        let mut tx = self.store.begin().await?;

        let event = tx
            .get_event(request.event_id)
            .await?
            .ok_or_else(|| ReservationError::not_found("event", request.event_id))?;
        if !event.is_active() {
            return Err(ReservationError::Conflict("event is not active".to_string()));
        }

        match tx.reserve_tickets(event.id, request.quantity).await? {
            ReserveOutcome::Reserved { remaining } => {
                tracing::debug!(remaining, "tickets reserved");
            }
            ReserveOutcome::InsufficientInventory { available } => {
                return Err(ReservationError::Conflict(format!(
                    "insufficient tickets: {available} available"
                )));
            }
            ReserveOutcome::EventNotFound => {
                return Err(ReservationError::not_found("event", event.id));
            }
            ReserveOutcome::EventInactive => {
                return Err(ReservationError::Conflict("event is not active".to_string()));
            }
        }

        let now = Utc::now();
        let booking = Booking::pending(request, event.price, now)?;
        tx.insert_booking(&booking).await?;

        let receipt = format!("receipt_{}", booking.id);
        let order = match self
            .gateway
            .create_order(booking.total_price, &self.config.currency, &receipt)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback after gateway failure failed");
                }
                return Err(e.into());
            }
        };

        let payment = Payment::pending(&booking, order.order_id.clone(), receipt, now);
        tx.insert_payment(&payment).await?;
        tx.commit().await?;

        Ok((booking, payment, order))
    }

    /// Rejects a request whose total cannot be represented before any unit of work opens.
    async fn price_request(&self, request: &BookingRequest) -> Result<()> {
        let event = self
            .store
            .get_event(request.event_id)
            .await?
            .ok_or_else(|| ReservationError::not_found("event", request.event_id))?;
        event.price.multiply(request.quantity)?;
        Ok(())
    }

    async fn schedule_reconciliation(&self, booking: &Booking, payment: &Payment) -> Option<JobHandle> {
        let job = ReconciliationJob::for_reservation(booking, payment, self.config.reconciliation_window());

        match self.queue.enqueue(job, self.config.reconciliation_delay).await {
            Ok(handle) => {
                tracing::debug!(job_id = %handle.id, fire_at = %handle.fire_at, "reconciliation scheduled");
                Some(handle)
            }
            Err(e) => {
                // The booking stays committed; the sweeper picks it up later.
                metrics::counter!("reconciliation_enqueue_failures_total").increment(1);
                tracing::error!(
                    booking_id = %booking.id,
                    error = %ReservationError::QueueDelivery(e),
                    "booking committed without reconciliation job"
                );
                None
            }
        }
    }

    /// Stores a new event.
    pub async fn create_event(&self, event: Event) -> Result<Event> {
        self.store.insert_event(&event).await?;
        tracing::info!(event_id = %event.id, tickets = event.total_tickets, "event created");
        Ok(event)
    }

    pub async fn get_event(&self, event_id: EventId) -> Result<Event> {
        self.store
            .get_event(event_id)
            .await?
            .ok_or_else(|| ReservationError::not_found("event", event_id))
    }

    /// Loads a booking and its payment.
    pub async fn get_booking(&self, booking_id: BookingId) -> Result<BookingView> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| ReservationError::not_found("booking", booking_id))?;
        let payment = self.store.find_payment_by_booking(booking_id).await?;
        Ok(BookingView { booking, payment })
    }

    pub async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<Booking>> {
        Ok(self.store.list_bookings(query).await?)
    }
}
