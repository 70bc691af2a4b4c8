//! Bookings: a user's claim on tickets for one event.

use chrono::{DateTime, Utc};
use common::{BookingId, EventId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::state::{BookingStatus, PaymentStatus};
use crate::value_objects::{Attendee, Money, PaymentMethod, Quantity};

/// Longest cancellation reason that will be stored.
pub const MAX_CANCELLATION_REASON_LEN: usize = 500;

/// A validated request to book tickets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub event_id: EventId,
    pub user_id: UserId,
    pub quantity: Quantity,
    pub attendees: Vec<Attendee>,
    pub payment_method: PaymentMethod,
}

impl BookingRequest {
    /// Builds a request, rejecting attendee lists longer than the ticket count.
    pub fn new(
        event_id: EventId,
        user_id: UserId,
        quantity: Quantity,
        attendees: Vec<Attendee>,
        payment_method: PaymentMethod,
    ) -> Result<Self, DomainError> {
        if attendees.len() > quantity.get() as usize {
            return Err(DomainError::TooManyAttendees {
                attendees: attendees.len(),
                quantity: quantity.get(),
            });
        }
        Ok(Self {
            event_id,
            user_id,
            quantity,
            attendees,
            payment_method,
        })
    }
}

/// A reservation of tickets, paid or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub attendees: Vec<Attendee>,
    pub quantity: Quantity,
    pub ticket_price: Money,
    pub total_price: Money,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Creates a pending booking priced at `ticket_price` per ticket.
    pub fn pending(
        request: &BookingRequest,
        ticket_price: Money,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            id: BookingId::new(),
            event_id: request.event_id,
            user_id: request.user_id,
            attendees: request.attendees.clone(),
            quantity: request.quantity,
            ticket_price,
            total_price: ticket_price.multiply(request.quantity)?,
            payment_method: request.payment_method,
            payment_status: PaymentStatus::Pending,
            status: BookingStatus::Pending,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Moves the booking out of `Pending`.
    ///
    /// Fails if the booking already reached a terminal state.
    pub fn transition(
        &mut self,
        to: BookingStatus,
        payment_status: PaymentStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.payment_status = payment_status;
        if reason.is_some() {
            self.cancellation_reason = reason;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Trims a cancellation reason and enforces its length limit.
pub fn normalize_cancellation_reason(reason: Option<&str>) -> Result<Option<String>, DomainError> {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(None),
        Some(r) if r.chars().count() > MAX_CANCELLATION_REASON_LEN => {
            Err(DomainError::ReasonTooLong {
                max: MAX_CANCELLATION_REASON_LEN,
            })
        }
        Some(r) => Ok(Some(r.to_string())),
    }
}
