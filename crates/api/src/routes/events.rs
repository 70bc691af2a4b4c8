//! Event creation and lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use booking_store::BookingStore;
use chrono::{DateTime, Utc};
use common::EventId;
use domain::{Event, Money};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::parse_id;

#[derive(Deserialize)]
pub struct CreateEventRequest {
    pub title: String,
    pub price_cents: i64,
    pub total_tickets: u32,
    pub start_date: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub id: String,
    pub title: String,
    pub price_cents: i64,
    pub total_tickets: u32,
    pub available_tickets: u32,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        Self {
            id: event.id.to_string(),
            title: event.title,
            price_cents: event.price.cents(),
            total_tickets: event.total_tickets,
            available_tickets: event.available_tickets,
            status: event.status.to_string(),
            start_date: event.start_date,
            created_at: event.created_at,
        }
    }
}

/// POST /events: publish an event with its full ticket inventory.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<EventResponse>), ApiError> {
    let event = Event::new(
        &req.title,
        Money::from_cents(req.price_cents),
        req.total_tickets,
        req.start_date,
    )?;
    let event = state.coordinator.create_event(event).await?;

    Ok((StatusCode::CREATED, Json(event.into())))
}

/// GET /events/{id}: event details including the live ticket counter.
#[tracing::instrument(skip(state))]
pub async fn get<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<EventResponse>, ApiError> {
    let event_id: EventId = parse_id("event", &id)?;
    let event = state.coordinator.get_event(event_id).await?;
    Ok(Json(event.into()))
}
