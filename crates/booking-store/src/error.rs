use common::{BookingId, PaymentId};
use domain::DomainError;
use thiserror::Error;

/// Errors that can occur when interacting with the booking store.
///
/// All of these are treated as transient by callers on the reconciliation
/// path: the queue redelivers the job and the conditional writes make the
/// retry safe.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A booking already has a payment, or a gateway order id is reused.
    #[error("Duplicate payment for booking {booking_id} (order {gateway_order_id})")]
    DuplicatePayment {
        booking_id: BookingId,
        gateway_order_id: String,
    },

    /// A record with this id already exists.
    #[error("Duplicate {entity}: {id}")]
    Duplicate { entity: &'static str, id: String },

    /// A payment was written for a booking that does not exist.
    #[error("Booking {booking_id} not found for payment {payment_id}")]
    MissingBooking {
        booking_id: BookingId,
        payment_id: PaymentId,
    },

    /// A stored row could not be mapped back into a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(#[from] DomainError),

    /// A count does not fit the column it is stored in.
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: u32 },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
