//! Booking creation, lookup, listing and cancellation.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use booking_store::{BookingQuery, BookingStore, Page};
use chrono::{DateTime, Utc};
use common::{BookingId, EventId, UserId};
use domain::{Attendee, Booking, BookingRequest, BookingStatus, Payment, PaymentMethod, Quantity};
use reservation::{BookingView, Reservation};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::{parse_id, user_id};

// -- Request types --

#[derive(Deserialize)]
pub struct CreateBookingRequest {
    pub quantity: u32,
    #[serde(default)]
    pub attendees: Vec<AttendeeRequest>,
    pub payment_method: PaymentMethod,
}

#[derive(Deserialize)]
pub struct AttendeeRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Deserialize, Default)]
pub struct CancelBookingRequest {
    pub reason: Option<String>,
}

/// Query string for the booking list endpoints.
#[derive(Deserialize, Default)]
pub struct ListBookingsParams {
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

// -- Response types --

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub amount_cents: i64,
    pub status: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub receipt: String,
}

#[derive(Serialize)]
pub struct BookingResponse {
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    pub quantity: u32,
    pub ticket_price_cents: i64,
    pub total_price_cents: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: String,
    pub status: String,
    pub attendees: Vec<Attendee>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentResponse>,
}

/// What the client needs to complete payment at the gateway.
#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub receipt: String,
}

#[derive(Serialize)]
pub struct ReservationResponse {
    pub booking: BookingResponse,
    pub order: OrderResponse,
    /// When the booking is failed if still unpaid.
    pub expires_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id.to_string(),
            amount_cents: payment.amount.cents(),
            status: payment.payment_status.to_string(),
            gateway_order_id: payment.gateway_order_id,
            gateway_payment_id: payment.gateway_payment_id,
            receipt: payment.receipt,
        }
    }
}

impl BookingResponse {
    fn new(booking: Booking, payment: Option<Payment>) -> Self {
        Self {
            id: booking.id.to_string(),
            event_id: booking.event_id.to_string(),
            user_id: booking.user_id.to_string(),
            quantity: booking.quantity.get(),
            ticket_price_cents: booking.ticket_price.cents(),
            total_price_cents: booking.total_price.cents(),
            payment_method: booking.payment_method,
            payment_status: booking.payment_status.to_string(),
            status: booking.status.to_string(),
            attendees: booking.attendees,
            cancellation_reason: booking.cancellation_reason,
            created_at: booking.created_at,
            updated_at: booking.updated_at,
            payment: payment.map(PaymentResponse::from),
        }
    }
}

impl From<BookingView> for BookingResponse {
    fn from(view: BookingView) -> Self {
        Self::new(view.booking, view.payment)
    }
}

// -- Handlers --

/// POST /events/{id}/bookings: reserve tickets and open a gateway order.
#[tracing::instrument(skip(state, headers, req))]
pub async fn create<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), ApiError> {
    let event_id: EventId = parse_id("event", &id)?;
    let user_id = user_id(&headers)?;

    let attendees = req
        .attendees
        .iter()
        .map(|a| Attendee::new(&a.name, &a.email, &a.phone))
        .collect::<Result<Vec<_>, _>>()?;
    let request = BookingRequest::new(
        event_id,
        user_id,
        Quantity::new(req.quantity)?,
        attendees,
        req.payment_method,
    )?;

    let Reservation {
        booking,
        payment,
        order,
        ..
    } = state.coordinator.create_booking(request).await?;
    let expires_at = booking.created_at + state.coordinator.config().reconciliation_window();

    let response = ReservationResponse {
        booking: BookingResponse::new(booking, Some(payment)),
        order: OrderResponse {
            order_id: order.order_id,
            amount_cents: order.amount.cents(),
            currency: order.currency,
            receipt: order.receipt,
        },
        expires_at,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /bookings/{id}: a booking with its payment record.
#[tracing::instrument(skip(state))]
pub async fn get<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking_id: BookingId = parse_id("booking", &id)?;
    let view = state.coordinator.get_booking(booking_id).await?;
    Ok(Json(view.into()))
}

/// GET /users/{id}/bookings: a user's bookings, newest first.
#[tracing::instrument(skip(state, params))]
pub async fn list_for_user<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Query(params): Query<ListBookingsParams>,
) -> Result<Json<Page<BookingResponse>>, ApiError> {
    let user_id: UserId = parse_id("user", &id)?;
    list(&state, BookingQuery::for_user(user_id), params).await
}

/// GET /events/{id}/bookings: an event's bookings, newest first.
#[tracing::instrument(skip(state, params))]
pub async fn list_for_event<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Query(params): Query<ListBookingsParams>,
) -> Result<Json<Page<BookingResponse>>, ApiError> {
    let event_id: EventId = parse_id("event", &id)?;
    list(&state, BookingQuery::for_event(event_id), params).await
}

async fn list<S: BookingStore + Clone + 'static>(
    state: &AppState<S>,
    mut query: BookingQuery,
    params: ListBookingsParams,
) -> Result<Json<Page<BookingResponse>>, ApiError> {
    if let Some(status) = params.status.as_deref() {
        query = query.status(status.parse::<BookingStatus>()?);
    }
    query.created_from = params.from;
    query.created_to = params.to;
    query = query.page(
        params.page.unwrap_or(1),
        params.limit.unwrap_or(BookingQuery::DEFAULT_LIMIT),
    );

    let page = state.coordinator.list_bookings(&query).await?;
    Ok(Json(Page {
        items: page
            .items
            .into_iter()
            .map(|b| BookingResponse::new(b, None))
            .collect(),
        total: page.total,
        page: page.page,
        limit: page.limit,
        total_pages: page.total_pages,
    }))
}

/// POST /bookings/{id}/cancel: the owner gives up a pending booking.
///
/// The body is optional; when present it may carry a `reason`.
#[tracing::instrument(skip(state, headers, body))]
pub async fn cancel<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking_id: BookingId = parse_id("booking", &id)?;
    let user_id = user_id(&headers)?;
    let req: CancelBookingRequest = if body.is_empty() {
        CancelBookingRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid cancel request: {e}")))?
    };

    let booking = state
        .coordinator
        .cancel_booking(booking_id, user_id, req.reason.as_deref())
        .await?;
    Ok(Json(BookingResponse::new(booking, None)))
}
