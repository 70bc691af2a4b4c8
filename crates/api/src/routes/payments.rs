//! Client-side payment verification callback.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use booking_store::BookingStore;
use reservation::Ack;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct VerifyPaymentRequest {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

#[derive(Serialize)]
pub struct VerifyPaymentResponse {
    /// `"applied"` when this call settled the payment, `"already_settled"` otherwise.
    pub result: &'static str,
    pub payment_status: String,
}

/// POST /payments/verify: checks the gateway signature the client received.
///
/// A mismatched signature fails the payment and its booking and answers 400.
#[tracing::instrument(skip(state, req), fields(order_id = %req.order_id))]
pub async fn verify<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, ApiError> {
    let ack = state
        .updater
        .verify_payment(&req.order_id, &req.payment_id, &req.signature)
        .await?;

    let response = match ack {
        Ack::Applied => VerifyPaymentResponse {
            result: "applied",
            payment_status: domain::PaymentStatus::Completed.to_string(),
        },
        Ack::AlreadySettled(status) => VerifyPaymentResponse {
            result: "already_settled",
            payment_status: status.to_string(),
        },
    };
    Ok(Json(response))
}
