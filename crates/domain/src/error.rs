//! Domain error types.

use thiserror::Error;

use crate::state::BookingStatus;
use crate::value_objects::Money;

/// Errors raised while validating or transitioning domain entities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Ticket quantity outside the allowed range.
    #[error("Quantity must be between 1 and 10, got {quantity}")]
    InvalidQuantity { quantity: u32 },

    /// An attendee field failed validation.
    #[error("Invalid attendee {field}: {reason}")]
    InvalidAttendee { field: &'static str, reason: String },

    /// More attendees listed than tickets requested.
    #[error("{attendees} attendees listed for {quantity} tickets")]
    TooManyAttendees { attendees: usize, quantity: u32 },

    /// Event fields failed validation.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Ticket price times quantity does not fit in minor units.
    #[error("Total for {quantity} tickets at {price} overflows")]
    PriceOverflow { price: Money, quantity: u32 },

    /// Cancellation reason exceeds the stored limit.
    #[error("Cancellation reason exceeds {max} characters")]
    ReasonTooLong { max: usize },

    /// A booking transition the state machine does not allow.
    #[error("Invalid booking transition from {from} to {to}")]
    InvalidStateTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    /// A stored or submitted value did not name a known variant.
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}
