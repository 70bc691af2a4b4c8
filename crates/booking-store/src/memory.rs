use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{BookingId, EventId, PaymentId};
use domain::{
    Booking, BookingStatus, Event, EventStatus, Payment, PaymentSettlement, Quantity,
    ReconciliationJob,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    BookingQuery, Page, Result, StoreError,
    store::{BookingStore, BookingTransition, ReserveOutcome, UnitOfWork},
};

#[derive(Debug, Clone, Default)]
struct Tables {
    events: HashMap<EventId, Event>,
    bookings: HashMap<BookingId, Booking>,
    payments: HashMap<PaymentId, Payment>,
    payments_by_order: HashMap<String, PaymentId>,
    payments_by_booking: HashMap<BookingId, PaymentId>,
    reserves: u64,
    restores: u64,
}

impl Tables {
    fn reserve(&mut self, event_id: EventId, quantity: Quantity) -> ReserveOutcome {
        let Some(event) = self.events.get_mut(&event_id) else {
            return ReserveOutcome::EventNotFound;
        };
        if !event.is_active() {
            return ReserveOutcome::EventInactive;
        }
        if event.available_tickets < quantity.get() {
            return ReserveOutcome::InsufficientInventory {
                available: event.available_tickets,
            };
        }
        event.available_tickets -= quantity.get();
        self.reserves += 1;
        ReserveOutcome::Reserved {
            remaining: event.available_tickets,
        }
    }

    fn restore(&mut self, event_id: EventId, quantity: Quantity) {
        match self.events.get_mut(&event_id) {
            Some(event) => {
                event.available_tickets = event.available_tickets.saturating_add(quantity.get());
                self.restores += 1;
            }
            None => tracing::warn!(%event_id, "restore for unknown event ignored"),
        }
    }

    fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
        if !self.bookings.contains_key(&payment.booking_id) {
            return Err(StoreError::MissingBooking {
                booking_id: payment.booking_id,
                payment_id: payment.id,
            });
        }
        if self.payments_by_booking.contains_key(&payment.booking_id)
            || self.payments_by_order.contains_key(&payment.gateway_order_id)
        {
            return Err(StoreError::DuplicatePayment {
                booking_id: payment.booking_id,
                gateway_order_id: payment.gateway_order_id.clone(),
            });
        }
        if self.payments.contains_key(&payment.id) {
            return Err(StoreError::Duplicate {
                entity: "payment",
                id: payment.id.to_string(),
            });
        }
        self.payments_by_order
            .insert(payment.gateway_order_id.clone(), payment.id);
        self.payments_by_booking.insert(payment.booking_id, payment.id);
        self.payments.insert(payment.id, payment.clone());
        Ok(())
    }
}

/// In-memory booking store for testing and single-process deployments.
///
/// A unit of work holds the store lock from `begin` until it commits or
/// rolls back, so transactions are fully serialized. Never call the store
/// itself while holding one of its units of work.
#[derive(Clone, Default)]
pub struct InMemoryBookingStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryBookingStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current ticket counter of an event.
    pub async fn available_tickets(&self, event_id: EventId) -> Option<u32> {
        self.tables
            .lock()
            .await
            .events
            .get(&event_id)
            .map(|e| e.available_tickets)
    }

    /// Number of committed successful ticket reservations.
    pub async fn reserve_count(&self) -> u64 {
        self.tables.lock().await.reserves
    }

    /// Number of committed ticket restores.
    pub async fn restore_count(&self) -> u64 {
        self.tables.lock().await.restores
    }

    pub async fn booking_count(&self) -> usize {
        self.tables.lock().await.bookings.len()
    }

    pub async fn payment_count(&self) -> usize {
        self.tables.lock().await.payments.len()
    }

    /// Sum of tickets held by `Pending` and `Confirmed` bookings of an event.
    pub async fn held_tickets(&self, event_id: EventId) -> u32 {
        self.tables
            .lock()
            .await
            .bookings
            .values()
            .filter(|b| b.event_id == event_id && b.status.holds_inventory())
            .map(|b| b.quantity.get())
            .sum()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    type Tx = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx> {
        let guard = self.tables.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(InMemoryUnitOfWork {
            guard,
            snapshot: Some(snapshot),
        })
    }

    async fn insert_event(&self, event: &Event) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.events.contains_key(&event.id) {
            return Err(StoreError::Duplicate {
                entity: "event",
                id: event.id.to_string(),
            });
        }
        tables.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>> {
        Ok(self.tables.lock().await.events.get(&event_id).cloned())
    }

    async fn deactivate_started_events(&self, now: DateTime<Utc>) -> Result<Vec<EventId>> {
        let mut tables = self.tables.lock().await;
        let mut changed = Vec::new();
        for event in tables.events.values_mut() {
            if event.is_active() && event.has_started(now) {
                event.status = EventStatus::Inactive;
                changed.push(event.id);
            }
        }
        Ok(changed)
    }

    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>> {
        Ok(self.tables.lock().await.bookings.get(&booking_id).cloned())
    }

    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.tables.lock().await.payments.get(&payment_id).cloned())
    }

    async fn find_payment_by_order(&self, gateway_order_id: &str) -> Result<Option<Payment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments_by_order
            .get(gateway_order_id)
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn find_payment_by_booking(&self, booking_id: BookingId) -> Result<Option<Payment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments_by_booking
            .get(&booking_id)
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<Booking>> {
        let tables = self.tables.lock().await;
        let mut matching: Vec<&Booking> = tables
            .bookings
            .values()
            .filter(|b| query.matches(b))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, total, query))
    }

    async fn stale_pending_bookings(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReconciliationJob>> {
        let tables = self.tables.lock().await;
        let mut stale: Vec<&Booking> = tables
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.created_at < created_before)
            .collect();
        stale.sort_by_key(|b| b.created_at);

        Ok(stale
            .into_iter()
            .filter_map(|booking| {
                let payment = tables
                    .payments_by_booking
                    .get(&booking.id)
                    .and_then(|id| tables.payments.get(id))?;
                Some(ReconciliationJob::for_reservation(
                    booking,
                    payment,
                    Duration::zero(),
                ))
            })
            .take(limit)
            .collect())
    }
}

/// Unit of work over [`InMemoryBookingStore`].
///
/// Writes go straight to the locked tables; a snapshot taken at `begin` is
/// restored on rollback or drop.
pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    snapshot: Option<Tables>,
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn get_event(&mut self, event_id: EventId) -> Result<Option<Event>> {
        Ok(self.guard.events.get(&event_id).cloned())
    }

    async fn reserve_tickets(
        &mut self,
        event_id: EventId,
        quantity: Quantity,
    ) -> Result<ReserveOutcome> {
        Ok(self.guard.reserve(event_id, quantity))
    }

    async fn restore_tickets(&mut self, event_id: EventId, quantity: Quantity) -> Result<()> {
        self.guard.restore(event_id, quantity);
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<()> {
        if self.guard.bookings.contains_key(&booking.id) {
            return Err(StoreError::Duplicate {
                entity: "booking",
                id: booking.id.to_string(),
            });
        }
        self.guard.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
        self.guard.insert_payment(payment)
    }

    async fn settle_payment(
        &mut self,
        payment_id: PaymentId,
        settlement: &PaymentSettlement,
    ) -> Result<bool> {
        Ok(match self.guard.payments.get_mut(&payment_id) {
            Some(payment) => settlement.apply(payment, Utc::now()),
            None => false,
        })
    }

    async fn transition_booking(
        &mut self,
        booking_id: BookingId,
        transition: &BookingTransition,
    ) -> Result<bool> {
        let Some(booking) = self.guard.bookings.get_mut(&booking_id) else {
            return Ok(false);
        };
        Ok(booking
            .transition(
                transition.to,
                transition.payment_status,
                transition.reason.clone(),
                Utc::now(),
            )
            .is_ok())
    }

    async fn commit(mut self) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        // Drop restores the snapshot.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use common::UserId;
    use domain::{BookingRequest, Money, PaymentMethod, PaymentStatus};

    use super::*;

    async fn store_with_event(tickets: u32) -> (InMemoryBookingStore, Event) {
        let store = InMemoryBookingStore::new();
        let event = Event::new(
            "Open Air Concert",
            Money::from_cents(10_000),
            tickets,
            Utc::now() + Duration::days(3),
        )
        .unwrap();
        store.insert_event(&event).await.unwrap();
        (store, event)
    }

    fn booking_for(event: &Event, quantity: u32) -> Booking {
        let request = BookingRequest::new(
            event.id,
            UserId::new(),
            Quantity::new(quantity).unwrap(),
            vec![],
            PaymentMethod::Upi,
        )
        .unwrap();
        Booking::pending(&request, event.price, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_reserve_is_conditional() {
        let (store, event) = store_with_event(3).await;
        let mut tx = store.begin().await.unwrap();

        let outcome = tx
            .reserve_tickets(event.id, Quantity::new(2).unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, ReserveOutcome::Reserved { remaining: 1 });

        let outcome = tx
            .reserve_tickets(event.id, Quantity::new(2).unwrap())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReserveOutcome::InsufficientInventory { available: 1 }
        );

        let outcome = tx
            .reserve_tickets(EventId::new(), Quantity::new(1).unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, ReserveOutcome::EventNotFound);

        tx.commit().await.unwrap();
        assert_eq!(store.available_tickets(event.id).await, Some(1));
        assert_eq!(store.reserve_count().await, 1);
    }

    #[tokio::test]
    async fn test_reserve_refuses_inactive_event() {
        let (store, event) = store_with_event(3).await;
        store
            .deactivate_started_events(event.start_date)
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        let outcome = tx
            .reserve_tickets(event.id, Quantity::new(1).unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, ReserveOutcome::EventInactive);
    }

    #[tokio::test]
    async fn test_rollback_discards_all_writes() {
        let (store, event) = store_with_event(5).await;
        let booking = booking_for(&event, 2);

        let mut tx = store.begin().await.unwrap();
        tx.reserve_tickets(event.id, booking.quantity).await.unwrap();
        tx.insert_booking(&booking).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.available_tickets(event.id).await, Some(5));
        assert!(store.get_booking(booking.id).await.unwrap().is_none());
        assert_eq!(store.reserve_count().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_rolls_back() {
        let (store, event) = store_with_event(5).await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.reserve_tickets(event.id, Quantity::new(4).unwrap())
                .await
                .unwrap();
        }
        assert_eq!(store.available_tickets(event.id).await, Some(5));
    }

    #[tokio::test]
    async fn test_payment_is_unique_per_booking_and_order() {
        let (store, event) = store_with_event(5).await;
        let booking = booking_for(&event, 1);
        let payment = Payment::pending(&booking, "order_1", "receipt_1", Utc::now());

        let mut tx = store.begin().await.unwrap();
        tx.insert_booking(&booking).await.unwrap();
        tx.insert_payment(&payment).await.unwrap();

        let second = Payment::pending(&booking, "order_2", "receipt_2", Utc::now());
        assert!(matches!(
            tx.insert_payment(&second).await,
            Err(StoreError::DuplicatePayment { .. })
        ));
        tx.commit().await.unwrap();

        let found = store.find_payment_by_order("order_1").await.unwrap().unwrap();
        assert_eq!(found.id, payment.id);
        let by_booking = store
            .find_payment_by_booking(booking.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_booking.id, payment.id);
    }

    #[tokio::test]
    async fn test_guarded_transitions_apply_once() {
        let (store, event) = store_with_event(5).await;
        let booking = booking_for(&event, 1);
        let payment = Payment::pending(&booking, "order_1", "receipt_1", Utc::now());
        let mut tx = store.begin().await.unwrap();
        tx.insert_booking(&booking).await.unwrap();
        tx.insert_payment(&payment).await.unwrap();
        tx.commit().await.unwrap();

        let settle = PaymentSettlement::new(PaymentStatus::Completed);
        let confirm = BookingTransition::new(BookingStatus::Confirmed, PaymentStatus::Completed);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.settle_payment(payment.id, &settle).await.unwrap());
        assert!(tx.transition_booking(booking.id, &confirm).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let fail = PaymentSettlement::new(PaymentStatus::Failed);
        assert!(!tx.settle_payment(payment.id, &fail).await.unwrap());
        let expire = BookingTransition::new(BookingStatus::Failed, PaymentStatus::Failed);
        assert!(!tx.transition_booking(booking.id, &expire).await.unwrap());
        tx.commit().await.unwrap();

        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert_eq!(stored.payment_status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_list_bookings_paginates_newest_first() {
        let (store, event) = store_with_event(50).await;
        let user = UserId::new();
        let mut ids = Vec::new();
        let mut tx = store.begin().await.unwrap();
        for i in 0..5 {
            let mut booking = booking_for(&event, 1);
            booking.user_id = user;
            booking.created_at = Utc::now() + Duration::seconds(i);
            tx.insert_booking(&booking).await.unwrap();
            ids.push(booking.id);
        }
        tx.insert_booking(&booking_for(&event, 1)).await.unwrap();
        tx.commit().await.unwrap();

        let page = store
            .list_bookings(&BookingQuery::for_user(user).page(1, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, ids[4]);
        assert_eq!(page.items[1].id, ids[3]);

        let last = store
            .list_bookings(&BookingQuery::for_user(user).page(3, 2))
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].id, ids[0]);

        let by_event = store
            .list_bookings(&BookingQuery::for_event(event.id).status(BookingStatus::Pending))
            .await
            .unwrap();
        assert_eq!(by_event.total, 6);
    }

    #[tokio::test]
    async fn test_stale_pending_bookings() {
        let (store, event) = store_with_event(5).await;
        let mut old = booking_for(&event, 2);
        old.created_at = Utc::now() - Duration::minutes(30);
        let fresh = booking_for(&event, 1);
        let mut tx = store.begin().await.unwrap();
        for booking in [&old, &fresh] {
            tx.insert_booking(booking).await.unwrap();
            let order = format!("order_{}", booking.id);
            tx.insert_payment(&Payment::pending(booking, order, "r", Utc::now()))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        let jobs = store
            .stale_pending_bookings(Utc::now() - Duration::minutes(10), 10)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].booking_id, old.id);
        assert_eq!(jobs[0].quantity.get(), 2);
    }
}
