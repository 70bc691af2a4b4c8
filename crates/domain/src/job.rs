//! Delayed reconciliation jobs.

use chrono::{DateTime, Duration, Utc};
use common::{BookingId, EventId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::booking::Booking;
use crate::payment::Payment;
use crate::value_objects::Quantity;

/// A scheduled check that fails a booking whose payment never arrived.
///
/// Carries everything the worker needs to restore inventory without
/// re-reading the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationJob {
    pub booking_id: BookingId,
    pub event_id: EventId,
    pub quantity: Quantity,
    pub payment_id: PaymentId,
    pub fire_at: DateTime<Utc>,
}

impl ReconciliationJob {
    /// Builds the job for a freshly committed reservation.
    pub fn for_reservation(booking: &Booking, payment: &Payment, delay: Duration) -> Self {
        Self {
            booking_id: booking.id,
            event_id: booking.event_id,
            quantity: booking.quantity,
            payment_id: payment.id,
            fire_at: booking.created_at + delay,
        }
    }
}
