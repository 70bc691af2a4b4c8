//! Shared types for the ticket reservation system.

pub mod types;

pub use types::{BookingId, EventId, JobId, PaymentId, UserId};
