//! Background loops that drive the delayed queue and the sweeper.

use std::sync::Arc;
use std::time::Duration;

use booking_store::{DelayedQueue, NackOutcome, QueueError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::worker::JobHandler;

/// Polling settings for [`ReconciliationRunner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub poll_interval: Duration,
    /// Maximum deliveries claimed per poll.
    pub batch_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 32,
        }
    }
}

/// Handle to a running background loop.
///
/// Dropping the handle leaves the loop running; call
/// [`WorkerHandle::shutdown`] to stop it.
pub struct WorkerHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(worker = name, ?interval, "background worker started");

            while !*shutdown_rx.borrow() {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::info!(worker = name, "background worker stopped");
        });

        Self {
            name,
            shutdown,
            task,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signals the loop to stop and waits for the current tick to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(worker = self.name, error = %e, "background worker panicked");
        }
    }
}

/// Polls the delayed queue and hands due jobs to a [`JobHandler`].
///
/// Successful jobs are acked. Failed jobs are nacked, which reschedules
/// them with backoff until the queue dead-letters them.
#[derive(Clone)]
pub struct ReconciliationRunner {
    queue: Arc<dyn DelayedQueue>,
    handler: Arc<dyn JobHandler>,
    config: RunnerConfig,
}

impl ReconciliationRunner {
    pub fn new(
        queue: Arc<dyn DelayedQueue>,
        handler: Arc<dyn JobHandler>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Claims one batch of due jobs and processes it.
    ///
    /// Returns the number of deliveries handled.
    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let deliveries = self.queue.claim_due(self.config.batch_size).await?;
        let claimed = deliveries.len();

        for delivery in deliveries {
            match self.handler.handle(&delivery.job).await {
                Ok(()) => self.queue.ack(&delivery).await?,
                Err(e) => {
                    let reason = e.to_string();
                    match self.queue.nack(&delivery, &reason).await? {
                        NackOutcome::Retrying { retry_in } => {
                            tracing::warn!(
                                job_id = %delivery.id,
                                booking_id = %delivery.job.booking_id,
                                attempts = delivery.attempts,
                                ?retry_in,
                                error = %e,
                                "reconciliation failed, will retry"
                            );
                        }
                        NackOutcome::DeadLettered => {
                            metrics::counter!("reconciliation_jobs_dead_lettered_total")
                                .increment(1);
                            tracing::error!(
                                job_id = %delivery.id,
                                booking_id = %delivery.job.booking_id,
                                attempts = delivery.attempts,
                                error = %e,
                                "reconciliation job dead-lettered"
                            );
                        }
                    }
                }
            }
        }

        Ok(claimed)
    }

    /// Starts polling on the current tokio runtime.
    pub fn start(self) -> WorkerHandle {
        let interval = self.config.poll_interval;
        let runner = Arc::new(self);
        WorkerHandle::spawn("reconciliation-runner", interval, move || {
            let runner = Arc::clone(&runner);
            async move {
                if let Err(e) = runner.run_once().await {
                    tracing::warn!(error = %e, "queue poll failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use booking_store::{InMemoryDelayedQueue, QueueConfig};
    use chrono::Utc;
    use common::{BookingId, EventId, PaymentId};
    use domain::{Quantity, ReconciliationJob};

    use super::*;
    use crate::error::{ReservationError, Result};

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyHandler {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _job: &ReconciliationJob) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ReservationError::Conflict("transient".to_string()));
            }
            Ok(())
        }
    }

    fn job() -> ReconciliationJob {
        ReconciliationJob {
            booking_id: BookingId::new(),
            event_id: EventId::new(),
            quantity: Quantity::new(1).unwrap(),
            payment_id: PaymentId::new(),
            fire_at: Utc::now(),
        }
    }

    fn queue(max_attempts: u32) -> InMemoryDelayedQueue {
        InMemoryDelayedQueue::new(QueueConfig {
            max_attempts,
            lease: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(1),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let queue = queue(5);
        let handler = Arc::new(FlakyHandler {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let runner = ReconciliationRunner::new(
            Arc::new(queue.clone()),
            handler.clone(),
            RunnerConfig::default(),
        );
        queue.enqueue(job(), Duration::ZERO).await.unwrap();

        assert_eq!(runner.run_once().await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(runner.run_once().await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(runner.run_once().await.unwrap(), 1);

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letters_after_max_attempts() {
        let queue = queue(2);
        let handler = Arc::new(FlakyHandler {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let runner =
            ReconciliationRunner::new(Arc::new(queue.clone()), handler, RunnerConfig::default());
        queue.enqueue(job(), Duration::ZERO).await.unwrap();

        runner.run_once().await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        runner.run_once().await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(runner.run_once().await.unwrap(), 0);

        assert_eq!(queue.dead_letters().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_runner_processes_and_shuts_down() {
        let queue = queue(5);
        let handler = Arc::new(FlakyHandler {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let runner = ReconciliationRunner::new(
            Arc::new(queue.clone()),
            handler.clone(),
            RunnerConfig {
                poll_interval: Duration::from_millis(100),
                batch_size: 10,
            },
        );
        queue.enqueue(job(), Duration::from_secs(5)).await.unwrap();

        let handle = runner.start();
        assert_eq!(handle.name(), "reconciliation-runner");
        tokio::time::sleep(Duration::from_secs(6)).await;
        handle.shutdown().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty().await);
    }
}
