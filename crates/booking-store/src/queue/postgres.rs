use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::JobId;
use domain::ReconciliationJob;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::{
    DelayedQueue, Delivery, JobHandle, NackOutcome, QueueConfig, QueueError,
    lease_exhausted_reason, to_chrono,
};

/// Delayed queue stored in the `reconciliation_jobs` table.
///
/// Claims use `FOR UPDATE SKIP LOCKED`, so several workers can poll the
/// same table without handing out a job twice within one lease.
#[derive(Clone)]
pub struct PostgresDelayedQueue {
    pool: PgPool,
    config: QueueConfig,
}

impl PostgresDelayedQueue {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }
}

fn row_to_delivery(row: PgRow) -> Result<Delivery, QueueError> {
    let payload: serde_json::Value = row.try_get("payload")?;
    let attempts: i32 = row.try_get("attempts")?;
    Ok(Delivery {
        id: JobId::from_uuid(row.try_get::<Uuid, _>("id")?),
        job: serde_json::from_value(payload)?,
        attempts: u32::try_from(attempts).unwrap_or(0),
    })
}

#[async_trait]
impl DelayedQueue for PostgresDelayedQueue {
    async fn enqueue(&self, job: ReconciliationJob, delay: Duration) -> Result<JobHandle, QueueError> {
        let id = JobId::new();
        let fire_at = Utc::now() + to_chrono(delay);
        let payload = serde_json::to_value(&job)?;

        sqlx::query(
            r#"
            INSERT INTO reconciliation_jobs (id, booking_id, payload, visible_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id.as_uuid())
        .bind(job.booking_id.as_uuid())
        .bind(payload)
        .bind(fire_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(job_id = %id, %fire_at, "job enqueued");
        Ok(JobHandle { id, fire_at })
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<Delivery>, QueueError> {
        let now = Utc::now();
        let max_attempts = i32::try_from(self.config.max_attempts).unwrap_or(i32::MAX);

        // Jobs whose leases expired on every allowed attempt never reached nack.
        let exhausted = sqlx::query(
            r#"
            UPDATE reconciliation_jobs
            SET dead_lettered_at = $1, last_error = 'lease expired after ' || attempts || ' attempts'
            WHERE id IN (
                SELECT id FROM reconciliation_jobs
                WHERE dead_lettered_at IS NULL AND visible_at <= $1 AND attempts >= $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, attempts
            "#,
        )
        .bind(now)
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;
        for row in &exhausted {
            let id: Uuid = row.try_get("id")?;
            let attempts: i32 = row.try_get("attempts")?;
            tracing::warn!(
                job_id = %id,
                attempts,
                reason = %lease_exhausted_reason(u32::try_from(attempts).unwrap_or(0)),
                "job dead-lettered after lease expiry"
            );
        }

        let rows = sqlx::query(
            r#"
            UPDATE reconciliation_jobs
            SET attempts = attempts + 1, visible_at = $2
            WHERE id IN (
                SELECT id FROM reconciliation_jobs
                WHERE dead_lettered_at IS NULL AND visible_at <= $1 AND attempts < $4
                ORDER BY visible_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, attempts
            "#,
        )
        .bind(now)
        .bind(now + to_chrono(self.config.lease))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_delivery).collect()
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM reconciliation_jobs WHERE id = $1")
            .bind(delivery.id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, reason: &str) -> Result<NackOutcome, QueueError> {
        if delivery.attempts >= self.config.max_attempts {
            sqlx::query(
                "UPDATE reconciliation_jobs SET dead_lettered_at = NOW(), last_error = $2 WHERE id = $1",
            )
            .bind(delivery.id.as_uuid())
            .bind(reason)
            .execute(&self.pool)
            .await?;
            tracing::warn!(job_id = %delivery.id, attempts = delivery.attempts, reason, "job dead-lettered");
            return Ok(NackOutcome::DeadLettered);
        }

        let retry_in = self.config.backoff_for(delivery.attempts);
        sqlx::query("UPDATE reconciliation_jobs SET visible_at = $2, last_error = $3 WHERE id = $1")
            .bind(delivery.id.as_uuid())
            .bind(Utc::now() + to_chrono(retry_in))
            .bind(reason)
            .execute(&self.pool)
            .await?;
        Ok(NackOutcome::Retrying { retry_in })
    }

    async fn dead_letters(&self) -> Result<Vec<Delivery>, QueueError> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload, attempts FROM reconciliation_jobs
            WHERE dead_lettered_at IS NOT NULL
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_delivery).collect()
    }
}
