use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookingId, EventId, PaymentId};
use domain::{
    Booking, BookingStatus, Event, Payment, PaymentSettlement, PaymentStatus, Quantity,
    ReconciliationJob,
};

use crate::{BookingQuery, Page, Result};

/// Result of the conditional "decrement iff enough tickets remain" operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Tickets were taken; `remaining` is the counter after the decrement.
    Reserved { remaining: u32 },
    /// Fewer than the requested tickets remain; nothing changed.
    InsufficientInventory { available: u32 },
    EventNotFound,
    EventInactive,
}

/// A guarded booking transition out of `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingTransition {
    pub to: BookingStatus,
    pub payment_status: PaymentStatus,
    pub reason: Option<String>,
}

impl BookingTransition {
    pub fn new(to: BookingStatus, payment_status: PaymentStatus) -> Self {
        Self {
            to,
            payment_status,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

/// An open transaction against the store.
///
/// Writes become visible to other callers only on [`UnitOfWork::commit`].
/// Dropping an uncommitted unit of work rolls it back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Reads an event inside the transaction.
    async fn get_event(&mut self, event_id: EventId) -> Result<Option<Event>>;

    /// Atomically decrements `available_tickets` iff the event is active and
    /// at least `quantity` tickets remain.
    async fn reserve_tickets(
        &mut self,
        event_id: EventId,
        quantity: Quantity,
    ) -> Result<ReserveOutcome>;

    /// Unconditionally adds `quantity` tickets back to the event.
    ///
    /// Callers must guard this with a state transition so a booking's
    /// tickets are only restored once.
    async fn restore_tickets(&mut self, event_id: EventId, quantity: Quantity) -> Result<()>;

    async fn insert_booking(&mut self, booking: &Booking) -> Result<()>;

    /// Inserts a payment; fails if the booking already has one or the
    /// gateway order id is taken.
    async fn insert_payment(&mut self, payment: &Payment) -> Result<()>;

    /// Settles a payment iff it is still `Pending` at write time.
    ///
    /// Returns false when another writer settled it first.
    async fn settle_payment(
        &mut self,
        payment_id: PaymentId,
        settlement: &PaymentSettlement,
    ) -> Result<bool>;

    /// Moves a booking out of `Pending` iff it is still `Pending` at write time.
    ///
    /// Returns false when the booking already reached a terminal state.
    async fn transition_booking(
        &mut self,
        booking_id: BookingId,
        transition: &BookingTransition,
    ) -> Result<bool>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// Persistent storage for events, bookings and payments.
///
/// All coordination between concurrent callers happens through the
/// conditional operations on this trait and [`UnitOfWork`]; no caller
/// reads a value and writes it back unguarded.
#[async_trait]
pub trait BookingStore: Send + Sync {
    type Tx: UnitOfWork;

    /// Opens a unit of work.
    async fn begin(&self) -> Result<Self::Tx>;

    async fn insert_event(&self, event: &Event) -> Result<()>;

    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>>;

    /// Marks active events whose start date is at or before `now` as inactive.
    ///
    /// Returns the ids of the events that changed.
    async fn deactivate_started_events(&self, now: DateTime<Utc>) -> Result<Vec<EventId>>;

    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>>;

    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>>;

    async fn find_payment_by_order(&self, gateway_order_id: &str) -> Result<Option<Payment>>;

    async fn find_payment_by_booking(&self, booking_id: BookingId) -> Result<Option<Payment>>;

    async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<Booking>>;

    /// Finds `Pending` bookings created before `created_before`, oldest first,
    /// as jobs ready to reconcile.
    async fn stale_pending_bookings(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReconciliationJob>>;
}
