//! Storage for the ticket reservation system.
//!
//! Provides the event inventory, booking and payment tables behind the
//! [`BookingStore`] and [`UnitOfWork`] traits, plus the [`DelayedQueue`] that
//! carries reconciliation jobs. Each has an in-memory and a PostgreSQL
//! implementation.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod queue;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryBookingStore, InMemoryUnitOfWork};
pub use postgres::{PostgresBookingStore, PostgresUnitOfWork};
pub use query::{BookingQuery, BookingScope, Page};
pub use queue::{
    DelayedQueue, Delivery, InMemoryDelayedQueue, JobHandle, NackOutcome, PostgresDelayedQueue,
    QueueConfig, QueueError,
};
pub use store::{BookingStore, BookingTransition, ReserveOutcome, UnitOfWork};
