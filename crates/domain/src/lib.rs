//! Domain layer for the ticket reservation system.
//!
//! This crate provides the entities the reservation workflow moves between:
//! - Event with its ticket inventory and active/inactive lifecycle
//! - Booking with the Pending → Confirmed/Failed/Cancelled state machine
//! - Payment tracking the gateway order for a booking
//! - ReconciliationJob scheduled to expire unpaid bookings

pub mod booking;
pub mod error;
pub mod event;
pub mod job;
pub mod payment;
pub mod state;
pub mod value_objects;

pub use booking::{Booking, BookingRequest, MAX_CANCELLATION_REASON_LEN, normalize_cancellation_reason};
pub use error::DomainError;
pub use event::{Event, EventStatus};
pub use job::ReconciliationJob;
pub use payment::{Payment, PaymentSettlement};
pub use state::{BookingStatus, PaymentOutcome, PaymentStatus};
pub use value_objects::{Attendee, Money, PaymentMethod, Quantity};
