//! Payment gateway webhook receiver.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use booking_store::BookingStore;
use reservation::{ReservationError, WebhookAck};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

/// POST /webhooks/gateway: payment captured/failed notifications.
///
/// Takes the body as raw bytes so the signature is checked against exactly
/// what the gateway sent. Redeliveries of settled payments answer 200.
#[tracing::instrument(skip_all)]
pub async fn gateway<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ReservationError::Signature)?;

    let ack = state
        .updater
        .ingest_webhook(&state.webhook_verifier, &body, signature)
        .await?;

    let status = match ack {
        WebhookAck::Processed(_) => "processed",
        WebhookAck::Ignored { .. } => "ignored",
    };
    Ok(Json(WebhookResponse { status }))
}
