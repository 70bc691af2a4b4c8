//! Durable delayed queue for reconciliation jobs.
//!
//! Delivery is at-least-once: a claimed job stays hidden for the lease
//! period and comes back if it is neither acked nor nacked. Consumers must
//! therefore be idempotent.

mod memory;
mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::JobId;
use domain::ReconciliationJob;
use thiserror::Error;

pub use memory::InMemoryDelayedQueue;
pub use postgres::PostgresDelayedQueue;

/// Errors raised by a delayed queue backend.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The queue refused the operation.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// Delivery and retry settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Deliveries after which a failing job is dead-lettered.
    pub max_attempts: u32,
    /// How long a claimed job stays invisible to other consumers.
    pub lease: Duration,
    /// Base delay before a nacked job is visible again; multiplied by the attempt count.
    pub retry_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lease: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(10),
        }
    }
}

impl QueueConfig {
    pub(crate) fn backoff_for(&self, attempts: u32) -> Duration {
        self.retry_backoff.saturating_mul(attempts.max(1))
    }
}

/// Returned by [`DelayedQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: JobId,
    /// Wall-clock time the job first becomes deliverable.
    pub fire_at: DateTime<Utc>,
}

/// A claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: JobId,
    pub job: ReconciliationJob,
    /// Number of times this job has been claimed, including this one.
    pub attempts: u32,
}

/// What happened to a nacked delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Retrying { retry_in: Duration },
    DeadLettered,
}

/// A queue that delivers each job no earlier than its delay.
#[async_trait]
pub trait DelayedQueue: Send + Sync {
    /// Schedules `job` to become deliverable after `delay`.
    ///
    /// Once this returns `Ok` the job survives a process restart (for
    /// durable backends).
    async fn enqueue(&self, job: ReconciliationJob, delay: Duration) -> Result<JobHandle, QueueError>;

    /// Claims up to `limit` due jobs, leasing each one.
    async fn claim_due(&self, limit: usize) -> Result<Vec<Delivery>, QueueError>;

    /// Removes a successfully handled job.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Returns a failed job for redelivery, or dead-letters it once it has
    /// used all its attempts.
    async fn nack(&self, delivery: &Delivery, reason: &str) -> Result<NackOutcome, QueueError>;

    /// Lists jobs that exhausted their attempts.
    async fn dead_letters(&self) -> Result<Vec<Delivery>, QueueError>;
}

/// Longest delay a queue honours; larger delays are treated as this one.
pub(crate) const MAX_DELAY: Duration = Duration::from_secs(100 * 52 * 7 * 24 * 60 * 60);

/// Converts a delay to a wall-clock offset, capping absurd values at a century.
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    let cap = chrono::Duration::weeks(52 * 100);
    chrono::Duration::from_std(duration).map_or(cap, |d| d.min(cap))
}

/// Error recorded on a job dead-lettered because its leases kept expiring.
pub(crate) fn lease_exhausted_reason(attempts: u32) -> String {
    format!("lease expired after {attempts} attempts")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_with_attempts() {
        let config = QueueConfig {
            retry_backoff: Duration::from_secs(2),
            ..QueueConfig::default()
        };
        assert_eq!(config.backoff_for(0), Duration::from_secs(2));
        assert_eq!(config.backoff_for(1), Duration::from_secs(2));
        assert_eq!(config.backoff_for(3), Duration::from_secs(6));
    }
}
