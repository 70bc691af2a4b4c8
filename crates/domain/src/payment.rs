//! Payment records linked one-to-one with bookings.

use chrono::{DateTime, Utc};
use common::{BookingId, PaymentId, UserId};
use serde::{Deserialize, Serialize};

use crate::booking::Booking;
use crate::state::PaymentStatus;
use crate::value_objects::{Money, PaymentMethod};

/// The payment side of a booking, tracking the gateway order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub receipt: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub gateway_signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a pending payment for `booking` tied to a gateway order.
    pub fn pending(
        booking: &Booking,
        gateway_order_id: impl Into<String>,
        receipt: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            booking_id: booking.id,
            user_id: booking.user_id,
            amount: booking.total_price,
            payment_method: booking.payment_method,
            payment_status: PaymentStatus::Pending,
            receipt: receipt.into(),
            gateway_order_id: gateway_order_id.into(),
            gateway_payment_id: None,
            gateway_signature: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The write applied to a payment when it settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSettlement {
    pub status: PaymentStatus,
    pub gateway_payment_id: Option<String>,
    pub gateway_signature: Option<String>,
}

impl PaymentSettlement {
    pub fn new(status: PaymentStatus) -> Self {
        Self {
            status,
            gateway_payment_id: None,
            gateway_signature: None,
        }
    }

    pub fn with_gateway_details(
        mut self,
        payment_id: Option<String>,
        signature: Option<String>,
    ) -> Self {
        self.gateway_payment_id = payment_id;
        self.gateway_signature = signature;
        self
    }

    /// Applies the settlement if the payment is still pending.
    ///
    /// Returns false, leaving the payment untouched, if it already settled.
    /// Gateway ids already on record are kept when the settlement carries none.
    pub fn apply(&self, payment: &mut Payment, now: DateTime<Utc>) -> bool {
        if payment.payment_status.is_settled() {
            return false;
        }
        payment.payment_status = self.status;
        if self.gateway_payment_id.is_some() {
            payment.gateway_payment_id = self.gateway_payment_id.clone();
        }
        if self.gateway_signature.is_some() {
            payment.gateway_signature = self.gateway_signature.clone();
        }
        payment.updated_at = now;
        true
    }
}
