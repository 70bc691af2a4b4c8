//! Reservation error types.

use booking_store::{QueueError, StoreError};
use domain::DomainError;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors that can occur while reserving, settling or reconciling bookings.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// Request failed validation before any state was touched.
    #[error("Validation error: {0}")]
    Validation(#[from] DomainError),

    /// An inbound payload could not be parsed.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The request conflicts with current state; nothing was changed.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The payment gateway refused or failed to create an order.
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// A payment or webhook signature did not verify.
    #[error("Invalid payment signature")]
    Signature,

    /// A job could not be handed to the delayed queue.
    #[error("Queue delivery error: {0}")]
    QueueDelivery(#[from] QueueError),

    /// A store read or write failed; safe to retry.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ReservationError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Short label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::InvalidPayload(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Gateway(_) => "gateway",
            Self::Signature => "signature",
            Self::QueueDelivery(_) => "queue",
            Self::Store(_) => "store",
        }
    }
}

impl From<serde_json::Error> for ReservationError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

/// Convenience type alias for reservation results.
pub type Result<T> = std::result::Result<T, ReservationError>;
