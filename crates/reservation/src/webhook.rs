//! Gateway webhook payloads and ingestion.

use booking_store::BookingStore;
use domain::PaymentOutcome;
use serde::Deserialize;

use crate::error::{ReservationError, Result};
use crate::signature::WebhookVerifier;
use crate::updater::{Ack, PaymentStatusUpdater};

pub const PAYMENT_CAPTURED: &str = "payment.captured";
pub const PAYMENT_FAILED: &str = "payment.failed";

/// Webhook envelope: `{ "event": ..., "payload": { "payment": { "entity": {...} } } }`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayWebhook {
    pub event: String,
    #[serde(default)]
    pub payload: Option<WebhookPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub payment: WebhookPaymentWrapper,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPaymentWrapper {
    pub entity: WebhookPaymentEntity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPaymentEntity {
    /// Gateway payment id.
    pub id: String,
    pub order_id: String,
}

impl GatewayWebhook {
    /// Maps the event name to a payment outcome; `None` for events we ignore.
    pub fn outcome(&self) -> Option<PaymentOutcome> {
        match self.event.as_str() {
            PAYMENT_CAPTURED => Some(PaymentOutcome::Completed),
            PAYMENT_FAILED => Some(PaymentOutcome::Failed),
            _ => None,
        }
    }
}

/// Result of ingesting a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAck {
    Processed(Ack),
    Ignored { event: String },
}

impl<S> PaymentStatusUpdater<S>
where
    S: BookingStore,
{
    /// Verifies and applies a raw webhook body.
    ///
    /// The signature covers the exact bytes received, so the body must not be
    /// re-serialized before verification.
    #[tracing::instrument(skip_all)]
    pub async fn ingest_webhook(
        &self,
        verifier: &WebhookVerifier,
        body: &[u8],
        signature: &str,
    ) -> Result<WebhookAck> {
        if !verifier.verify(body, signature) {
            tracing::warn!("webhook signature mismatch");
            return Err(ReservationError::Signature);
        }

        let webhook: GatewayWebhook = serde_json::from_slice(body)?;
        let Some(outcome) = webhook.outcome() else {
            tracing::debug!(event = %webhook.event, "webhook event ignored");
            return Ok(WebhookAck::Ignored {
                event: webhook.event,
            });
        };
        let entity = webhook
            .payload
            .map(|p| p.payment.entity)
            .ok_or_else(|| {
                ReservationError::InvalidPayload("webhook has no payment entity".to_string())
            })?;

        let ack = self
            .apply_outcome(&entity.order_id, outcome, Some(entity.id), None)
            .await?;
        Ok(WebhookAck::Processed(ack))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use booking_store::{InMemoryBookingStore, InMemoryDelayedQueue};
    use chrono::{Duration, Utc};
    use common::UserId;
    use domain::{BookingRequest, BookingStatus, Event, Money, PaymentMethod, PaymentStatus, Quantity};
    use serde_json::json;

    use super::*;
    use crate::config::ReservationConfig;
    use crate::coordinator::ReservationCoordinator;
    use crate::gateway::InMemoryPaymentGateway;

    fn body(event: &str, order_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event": event,
            "payload": { "payment": { "entity": { "id": "pay_9", "order_id": order_id, "amount": 1000 } } }
        }))
        .unwrap()
    }

    #[test]
    fn test_outcome_mapping() {
        let webhook: GatewayWebhook = serde_json::from_slice(&body(PAYMENT_CAPTURED, "o")).unwrap();
        assert_eq!(webhook.outcome(), Some(PaymentOutcome::Completed));
        let webhook: GatewayWebhook = serde_json::from_slice(&body(PAYMENT_FAILED, "o")).unwrap();
        assert_eq!(webhook.outcome(), Some(PaymentOutcome::Failed));
        let webhook: GatewayWebhook =
            serde_json::from_value(json!({ "event": "order.paid" })).unwrap();
        assert_eq!(webhook.outcome(), None);
    }

    #[tokio::test]
    async fn test_ingest_captured_webhook() {
        let store = InMemoryBookingStore::new();
        let gateway = Arc::new(InMemoryPaymentGateway::default());
        let coordinator = ReservationCoordinator::new(
            store.clone(),
            gateway.clone(),
            Arc::new(InMemoryDelayedQueue::default()),
            ReservationConfig::default(),
        );
        let event = coordinator
            .create_event(
                Event::new("Open Mic", Money::from_cents(400), 3, Utc::now() + Duration::days(1))
                    .unwrap(),
            )
            .await
            .unwrap();
        let request = BookingRequest::new(
            event.id,
            UserId::new(),
            Quantity::new(1).unwrap(),
            vec![],
            PaymentMethod::Upi,
        )
        .unwrap();
        let reservation = coordinator.create_booking(request).await.unwrap();
        let updater = PaymentStatusUpdater::new(store.clone(), gateway);
        let verifier = WebhookVerifier::new("whsec");

        let raw = body(PAYMENT_CAPTURED, &reservation.order.order_id);
        let bad = updater.ingest_webhook(&verifier, &raw, "00").await;
        assert!(matches!(bad, Err(ReservationError::Signature)));

        let signature = verifier.sign(&raw);
        let ack = updater.ingest_webhook(&verifier, &raw, &signature).await.unwrap();
        assert_eq!(ack, WebhookAck::Processed(Ack::Applied));
        let again = updater.ingest_webhook(&verifier, &raw, &signature).await.unwrap();
        assert_eq!(
            again,
            WebhookAck::Processed(Ack::AlreadySettled(PaymentStatus::Completed))
        );

        let booking = store.get_booking(reservation.booking.id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        let payment = store.get_payment(reservation.payment.id).await.unwrap().unwrap();
        assert_eq!(payment.gateway_payment_id.as_deref(), Some("pay_9"));

        let ignored = br#"{"event":"refund.created"}"#;
        let ack = updater
            .ingest_webhook(&verifier, ignored, &verifier.sign(ignored))
            .await
            .unwrap();
        assert_eq!(
            ack,
            WebhookAck::Ignored {
                event: "refund.created".to_string()
            }
        );
    }
}
