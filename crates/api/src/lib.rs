//! HTTP API server for ticket reservations.
//!
//! Exposes event and booking endpoints, the client payment verification
//! callback and the gateway webhook, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use booking_store::{BookingStore, DelayedQueue};
use metrics_exporter_prometheus::PrometheusHandle;
use reservation::{
    PaymentGateway, PaymentStatusUpdater, ReservationCoordinator, WebhookVerifier,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S: BookingStore> {
    pub coordinator: ReservationCoordinator<S>,
    pub updater: PaymentStatusUpdater<S>,
    pub webhook_verifier: WebhookVerifier,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: BookingStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/events", post(routes::events::create::<S>))
        .route("/events/{id}", get(routes::events::get::<S>))
        .route(
            "/events/{id}/bookings",
            post(routes::bookings::create::<S>).get(routes::bookings::list_for_event::<S>),
        )
        .route("/bookings/{id}", get(routes::bookings::get::<S>))
        .route("/bookings/{id}/cancel", post(routes::bookings::cancel::<S>))
        .route("/users/{id}/bookings", get(routes::bookings::list_for_user::<S>))
        .route("/payments/verify", post(routes::payments::verify::<S>))
        .route("/webhooks/gateway", post(routes::webhooks::gateway::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the coordinator and payment updater over a store, gateway and queue.
pub fn create_state<S: BookingStore + Clone + 'static>(
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    queue: Arc<dyn DelayedQueue>,
    config: &Config,
) -> Arc<AppState<S>> {
    let coordinator =
        ReservationCoordinator::new(store.clone(), gateway.clone(), queue, config.reservation());
    let updater = PaymentStatusUpdater::new(store, gateway);

    Arc::new(AppState {
        coordinator,
        updater,
        webhook_verifier: WebhookVerifier::new(config.gateway_webhook_secret.as_str()),
    })
}
