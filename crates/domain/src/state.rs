//! Booking and payment state machines.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The lifecycle state of a booking.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Confirmed   (payment captured)
///           ├──► Failed      (payment failed or timed out)
///           └──► Cancelled   (explicit cancellation)
/// ```
/// Every state other than `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BookingStatus {
    /// Tickets are held, awaiting payment.
    #[default]
    Pending,

    /// Payment captured (terminal state).
    Confirmed,

    /// Payment failed or never arrived (terminal state).
    Failed,

    /// Cancelled by the owner or an administrator (terminal state).
    Cancelled,
}

impl BookingStatus {
    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Pending)
    }

    /// Returns true if a booking in this state may move to `next`.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(self, BookingStatus::Pending) && next.is_terminal()
    }

    /// Returns true if bookings in this state still hold inventory.
    pub fn holds_inventory(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::Failed => "Failed",
            BookingStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(BookingStatus::Pending),
            "Confirmed" => Ok(BookingStatus::Confirmed),
            "Failed" => Ok(BookingStatus::Failed),
            "Cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(DomainError::UnknownVariant {
                kind: "booking status",
                value: other.to_string(),
            }),
        }
    }
}

/// Payment state as tracked on both the booking and the payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    /// Returns true once the gateway outcome (or a timeout) has been recorded.
    pub fn is_settled(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PaymentStatus::Pending),
            "Completed" => Ok(PaymentStatus::Completed),
            "Failed" => Ok(PaymentStatus::Failed),
            other => Err(DomainError::UnknownVariant {
                kind: "payment status",
                value: other.to_string(),
            }),
        }
    }
}

/// A gateway-confirmed payment result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentOutcome {
    Completed,
    Failed,
}

impl PaymentOutcome {
    /// The payment status this outcome settles to.
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            PaymentOutcome::Completed => PaymentStatus::Completed,
            PaymentOutcome::Failed => PaymentStatus::Failed,
        }
    }

    /// The booking status this outcome settles to.
    pub fn booking_status(&self) -> BookingStatus {
        match self {
            PaymentOutcome::Completed => BookingStatus::Confirmed,
            PaymentOutcome::Failed => BookingStatus::Failed,
        }
    }

    /// Returns true if settling with this outcome gives the tickets back.
    pub fn releases_inventory(&self) -> bool {
        matches!(self, PaymentOutcome::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        self.payment_status().as_str()
    }
}
