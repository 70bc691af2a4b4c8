//! Payment gateway adapter trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use domain::Money;
use serde::Serialize;
use thiserror::Error;

use crate::signature::{payment_message, sign_hex, verify_hex};

/// Errors returned by the payment gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Order rejected: {reason}")]
    Rejected { reason: String },

    #[error("Invalid order request: {0}")]
    InvalidRequest(String),

    #[error("Gateway timeout")]
    Timeout,

    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

/// An order created at the gateway for a pending booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayOrder {
    pub order_id: String,
    /// Amount in minor units.
    pub amount: Money,
    pub currency: String,
    pub receipt: String,
}

/// Abstraction over the external payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a payment order the client will pay against.
    async fn create_order(
        &self,
        amount: Money,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError>;

    /// Checks the signature the gateway issued for `payment_id` on `order_id`.
    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    /// Filled only when recording is enabled.
    orders: HashMap<String, GatewayOrder>,
    next_id: u64,
    record_orders: bool,
    fail_on_create_order: bool,
}

/// In-memory gateway for local development and tests. Not a production
/// payment processor: no money moves and no order reaches a real gateway.
///
/// Issues sequential order ids and signs payments with the configured key
/// secret, so tests can produce valid and invalid signatures. Created
/// orders are kept only after [`InMemoryPaymentGateway::record_orders`], so
/// a long-running dev server holds a counter rather than every order.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentGateway {
    key_secret: Arc<Vec<u8>>,
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl Default for InMemoryPaymentGateway {
    fn default() -> Self {
        Self::new("test_key_secret")
    }
}

impl InMemoryPaymentGateway {
    pub fn new(key_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            key_secret: Arc::new(key_secret.into()),
            state: Arc::new(Mutex::new(InMemoryGatewayState::default())),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, InMemoryGatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keeps every subsequently created order for [`InMemoryPaymentGateway::order`].
    pub fn record_orders(self) -> Self {
        self.state().record_orders = true;
        self
    }

    /// Configures the gateway to fail order creation.
    pub fn set_fail_on_create_order(&self, fail: bool) {
        self.state().fail_on_create_order = fail;
    }

    /// Returns the number of orders created.
    pub fn order_count(&self) -> u64 {
        self.state().next_id
    }

    /// Looks up a recorded order.
    pub fn order(&self, order_id: &str) -> Option<GatewayOrder> {
        self.state().orders.get(order_id).cloned()
    }

    /// Produces the signature the gateway would hand the client after a
    /// successful payment.
    pub fn sign_payment(&self, order_id: &str, payment_id: &str) -> String {
        sign_hex(&self.key_secret, payment_message(order_id, payment_id).as_bytes())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_order(
        &self,
        amount: Money,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        if amount.cents() <= 0 {
            return Err(GatewayError::InvalidRequest(format!(
                "amount must be positive, got {amount}"
            )));
        }

        let mut state = self.state();
        if state.fail_on_create_order {
            return Err(GatewayError::Unavailable("order creation disabled".to_string()));
        }

        state.next_id += 1;
        let order = GatewayOrder {
            order_id: format!("order_{:04}", state.next_id),
            amount,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
        };
        if state.record_orders {
            state.orders.insert(order.order_id.clone(), order.clone());
        }

        tracing::debug!(order_id = %order.order_id, amount = amount.cents(), "gateway order created");
        Ok(order)
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_hex(
            &self.key_secret,
            payment_message(order_id, payment_id).as_bytes(),
            signature,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequential_order_ids() {
        let gateway = InMemoryPaymentGateway::default().record_orders();
        let o1 = gateway
            .create_order(Money::from_cents(1000), "INR", "receipt_a")
            .await
            .unwrap();
        let o2 = gateway
            .create_order(Money::from_cents(2000), "INR", "receipt_b")
            .await
            .unwrap();

        assert_eq!(o1.order_id, "order_0001");
        assert_eq!(o2.order_id, "order_0002");
        assert_eq!(gateway.order_count(), 2);
        assert_eq!(gateway.order("order_0002").unwrap().receipt, "receipt_b");
    }

    #[tokio::test]
    async fn test_orders_are_not_retained_unless_recording() {
        let gateway = InMemoryPaymentGateway::default();
        for i in 0..1_000 {
            gateway
                .create_order(Money::from_cents(100), "INR", &format!("receipt_{i}"))
                .await
                .unwrap();
        }

        assert_eq!(gateway.order_count(), 1_000);
        assert!(gateway.order("order_0001").is_none());
        assert!(gateway.state().orders.is_empty());
    }

    #[tokio::test]
    async fn test_fail_on_create_order() {
        let gateway = InMemoryPaymentGateway::default();
        gateway.set_fail_on_create_order(true);

        let result = gateway.create_order(Money::from_cents(1000), "INR", "r").await;
        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
        assert_eq!(gateway.order_count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amount() {
        let gateway = InMemoryPaymentGateway::default();
        let result = gateway.create_order(Money::zero(), "INR", "r").await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
    }

    #[test]
    fn test_signature_round_trip() {
        let gateway = InMemoryPaymentGateway::new("key");
        let sig = gateway.sign_payment("order_0001", "pay_1");
        assert!(gateway.verify_signature("order_0001", "pay_1", &sig));
        assert!(!gateway.verify_signature("order_0001", "pay_2", &sig));

        let other = InMemoryPaymentGateway::new("other-key");
        assert!(!other.verify_signature("order_0001", "pay_1", &sig));
    }
}
