//! Ticket reservation with payment reconciliation.
//!
//! A reservation takes tickets, records a pending booking and payment, and
//! opens a gateway order in one unit of work. It is then finalized by
//! whichever comes first:
//! 1. a payment outcome (client verify or gateway webhook), or
//! 2. the delayed reconciliation job, which fails the booking and releases
//!    its tickets if no payment arrived.
//!
//! Both finalizers only write while the booking is still pending, so they
//! can race and be redelivered safely.

pub mod cancellation;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod runner;
pub mod signature;
pub mod sweeper;
pub mod updater;
pub mod webhook;
pub mod worker;

pub use config::ReservationConfig;
pub use coordinator::{BookingView, Reservation, ReservationCoordinator};
pub use error::{ReservationError, Result};
pub use gateway::{GatewayError, GatewayOrder, InMemoryPaymentGateway, PaymentGateway};
pub use runner::{ReconciliationRunner, RunnerConfig, WorkerHandle};
pub use signature::WebhookVerifier;
pub use sweeper::{SweepReport, Sweeper, SweeperConfig};
pub use updater::{Ack, PaymentStatusUpdater};
pub use webhook::{GatewayWebhook, WebhookAck};
pub use worker::{JobHandler, ReconcileOutcome, ReconciliationWorker};
