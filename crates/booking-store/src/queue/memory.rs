use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::JobId;
use domain::ReconciliationJob;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{
    DelayedQueue, Delivery, JobHandle, MAX_DELAY, NackOutcome, QueueConfig, QueueError,
    lease_exhausted_reason, to_chrono,
};

#[derive(Debug, Clone)]
struct QueuedJob {
    job: ReconciliationJob,
    visible_at: Instant,
    attempts: u32,
    last_error: Option<String>,
    dead_lettered: bool,
    seq: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, QueuedJob>,
    next_seq: u64,
}

/// In-process delayed queue.
///
/// Visibility is measured with `tokio::time::Instant`, so tests running on a
/// paused clock can step past delays without sleeping. Not durable: jobs are
/// lost with the process.
#[derive(Clone)]
pub struct InMemoryDelayedQueue {
    state: Arc<Mutex<QueueState>>,
    config: QueueConfig,
    fail_on_enqueue: Arc<AtomicBool>,
}

impl Default for InMemoryDelayedQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl InMemoryDelayedQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            config,
            fail_on_enqueue: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes subsequent enqueues fail (for testing).
    pub fn set_fail_on_enqueue(&self, fail: bool) {
        self.fail_on_enqueue.store(fail, Ordering::SeqCst);
    }

    /// Number of jobs not yet acked, including dead letters.
    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Last failure reason recorded for a job.
    pub async fn last_error(&self, id: JobId) -> Option<String> {
        self.state
            .lock()
            .await
            .jobs
            .get(&id)
            .and_then(|queued| queued.last_error.clone())
    }
}

/// `now + delay`, saturating at [`MAX_DELAY`] instead of overflowing the clock.
fn visible_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or_else(|| now + MAX_DELAY)
}

#[async_trait]
impl DelayedQueue for InMemoryDelayedQueue {
    async fn enqueue(&self, job: ReconciliationJob, delay: Duration) -> Result<JobHandle, QueueError> {
        if self.fail_on_enqueue.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("enqueue disabled".to_string()));
        }

        let id = JobId::new();
        let fire_at = Utc::now() + to_chrono(delay);
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(
            id,
            QueuedJob {
                job,
                visible_at: visible_after(Instant::now(), delay),
                attempts: 0,
                last_error: None,
                dead_lettered: false,
                seq,
            },
        );

        tracing::debug!(job_id = %id, ?delay, "job enqueued");
        Ok(JobHandle { id, fire_at })
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<Delivery>, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        // Due jobs whose leases expired on every allowed attempt never reached nack.
        let max_attempts = self.config.max_attempts;
        for (id, queued) in state.jobs.iter_mut() {
            if !queued.dead_lettered && queued.visible_at <= now && queued.attempts >= max_attempts {
                queued.dead_lettered = true;
                queued.last_error = Some(lease_exhausted_reason(queued.attempts));
                tracing::warn!(job_id = %id, attempts = queued.attempts, "job dead-lettered after lease expiry");
            }
        }

        let mut due: Vec<(JobId, Instant, u64)> = state
            .jobs
            .iter()
            .filter(|(_, queued)| !queued.dead_lettered && queued.visible_at <= now)
            .map(|(id, queued)| (*id, queued.visible_at, queued.seq))
            .collect();
        due.sort_by_key(|(_, visible_at, seq)| (*visible_at, *seq));
        due.truncate(limit);

        let mut deliveries = Vec::with_capacity(due.len());
        for (id, _, _) in due {
            if let Some(queued) = state.jobs.get_mut(&id) {
                queued.attempts += 1;
                queued.visible_at = visible_after(now, self.config.lease);
                deliveries.push(Delivery {
                    id,
                    job: queued.job.clone(),
                    attempts: queued.attempts,
                });
            }
        }
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.state.lock().await.jobs.remove(&delivery.id);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, reason: &str) -> Result<NackOutcome, QueueError> {
        let mut state = self.state.lock().await;
        let Some(queued) = state.jobs.get_mut(&delivery.id) else {
            // Already acked by a competing delivery.
            return Err(QueueError::Unavailable(format!(
                "job {} is no longer queued",
                delivery.id
            )));
        };

        queued.last_error = Some(reason.to_string());
        if queued.attempts >= self.config.max_attempts {
            queued.dead_lettered = true;
            tracing::warn!(job_id = %delivery.id, attempts = queued.attempts, reason, "job dead-lettered");
            return Ok(NackOutcome::DeadLettered);
        }

        let retry_in = self.config.backoff_for(queued.attempts);
        queued.visible_at = visible_after(Instant::now(), retry_in);
        Ok(NackOutcome::Retrying { retry_in })
    }

    async fn dead_letters(&self) -> Result<Vec<Delivery>, QueueError> {
        let state = self.state.lock().await;
        let mut dead: Vec<(u64, Delivery)> = state
            .jobs
            .iter()
            .filter(|(_, queued)| queued.dead_lettered)
            .map(|(id, queued)| {
                (
                    queued.seq,
                    Delivery {
                        id: *id,
                        job: queued.job.clone(),
                        attempts: queued.attempts,
                    },
                )
            })
            .collect();
        dead.sort_by_key(|(seq, _)| *seq);
        Ok(dead.into_iter().map(|(_, delivery)| delivery).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{BookingId, EventId, PaymentId};
    use domain::Quantity;

    use super::*;

    fn job() -> ReconciliationJob {
        ReconciliationJob {
            booking_id: BookingId::new(),
            event_id: EventId::new(),
            quantity: Quantity::new(1).unwrap(),
            payment_id: PaymentId::new(),
            fire_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_is_not_delivered_before_its_delay() {
        let queue = InMemoryDelayedQueue::default();
        queue.enqueue(job(), Duration::from_secs(300)).await.unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(queue.claim_due(10).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        let claimed = queue.claim_due(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_delivery_reappears_after_lease() {
        let config = QueueConfig {
            lease: Duration::from_secs(30),
            ..QueueConfig::default()
        };
        let queue = InMemoryDelayedQueue::new(config);
        queue.enqueue(job(), Duration::ZERO).await.unwrap();

        let first = queue.claim_due(10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(queue.claim_due(10).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(30)).await;
        let second = queue.claim_due(10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].attempts, 2);

        queue.ack(&second[0]).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_retries_then_dead_letters() {
        let config = QueueConfig {
            max_attempts: 2,
            lease: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(5),
        };
        let queue = InMemoryDelayedQueue::new(config);
        let handle = queue.enqueue(job(), Duration::ZERO).await.unwrap();

        let delivery = queue.claim_due(1).await.unwrap().remove(0);
        let outcome = queue.nack(&delivery, "store down").await.unwrap();
        assert_eq!(
            outcome,
            NackOutcome::Retrying {
                retry_in: Duration::from_secs(5)
            }
        );

        tokio::time::advance(Duration::from_secs(5)).await;
        let delivery = queue.claim_due(1).await.unwrap().remove(0);
        assert_eq!(delivery.attempts, 2);
        let outcome = queue.nack(&delivery, "store still down").await.unwrap();
        assert_eq!(outcome, NackOutcome::DeadLettered);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(queue.claim_due(1).await.unwrap().is_empty());

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, handle.id);
        assert_eq!(
            queue.last_error(handle.id).await.as_deref(),
            Some("store still down")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_leases_count_towards_max_attempts() {
        let config = QueueConfig {
            max_attempts: 3,
            lease: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(5),
        };
        let queue = InMemoryDelayedQueue::new(config);
        let handle = queue.enqueue(job(), Duration::ZERO).await.unwrap();

        // The consumer crashes after every claim, so only the lease brings the job back.
        let mut delivered = 0;
        for _ in 0..10 {
            delivered += queue.claim_due(10).await.unwrap().len();
            tokio::time::advance(Duration::from_secs(30)).await;
        }

        assert_eq!(delivered, 3);
        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, handle.id);
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(
            queue.last_error(handle.id).await.as_deref(),
            Some("lease expired after 3 attempts")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delay_does_not_overflow_the_clock() {
        let queue = InMemoryDelayedQueue::default();
        let handle = queue.enqueue(job(), Duration::MAX).await.unwrap();

        assert!(handle.fire_at > Utc::now() + chrono::Duration::weeks(52 * 99));
        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert!(queue.claim_due(10).await.unwrap().is_empty());
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_enqueue_failure_toggle() {
        let queue = InMemoryDelayedQueue::default();
        queue.set_fail_on_enqueue(true);
        assert!(matches!(
            queue.enqueue(job(), Duration::ZERO).await,
            Err(QueueError::Unavailable(_))
        ));
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_respects_limit_and_order() {
        let queue = InMemoryDelayedQueue::default();
        let first = queue.enqueue(job(), Duration::from_secs(1)).await.unwrap();
        let second = queue.enqueue(job(), Duration::from_secs(2)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        let claimed = queue.claim_due(1).await.unwrap();
        assert_eq!(claimed[0].id, first.id);
        let claimed = queue.claim_due(1).await.unwrap();
        assert_eq!(claimed[0].id, second.id);
    }
}
