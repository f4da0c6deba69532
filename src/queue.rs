//! Durable job queues on postgres.
//!
//! Both topics are plain tables drained with `FOR UPDATE SKIP LOCKED` inside
//! a transaction: the row lock is the dispatch lease. A worker that dies
//! mid-attempt rolls its transaction back, which releases the row and lets
//! another worker pick the job up — that is the whole stall-recovery story.
//! Retry scheduling lives in the `execute_after` column.

use chrono::Utc;
use rand::Rng;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Transaction;
use uuid::Uuid;

pub type PgTransaction = Transaction<'static, Postgres>;

/// What one dequeue-and-run pass observed; worker loops use it to decide
/// whether to sleep. `TaskFailed` means the job's processing errored and
/// the job was dead-lettered, not that a delivery attempt came back non-2xx
/// (that is normal `TaskCompleted` work).
pub enum ExecutionOutcome {
    TaskCompleted,
    TaskFailed,
    EmptyQueue,
}

#[derive(Debug, sqlx::FromRow)]
pub struct FanoutJob {
    pub event_id: Uuid,
    pub event_type: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct DeliveryJob {
    pub event_id: Uuid,
    pub subscription_id: Uuid,
    /// Attempts already spent on this job; the in-flight attempt is
    /// `n_attempts + 1`.
    pub n_attempts: i32,
}

/// One fan-out job per event; a redundant enqueue for the same event is a
/// no-op.
pub async fn enqueue_fanout(
    pool: &PgPool,
    event_id: Uuid,
    event_type: &str,
) -> Result<(), anyhow::Error> {
    sqlx::query(
        r#"
        INSERT INTO fanout_queue (event_id, event_type, enqueued_at)
        VALUES ($1, $2, now())
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(event_id)
    .bind(event_type)
    .execute(pool)
    .await?;
    Ok(())
}

/// Lease a fan-out job. The returned transaction holds the row lock; commit
/// through `complete_fanout` or drop to release the job unchanged.
pub async fn dequeue_fanout(
    pool: &PgPool,
) -> Result<Option<(PgTransaction, FanoutJob)>, anyhow::Error> {
    let mut transaction = pool.begin().await?;
    let job = sqlx::query_as::<_, FanoutJob>(
        r#"
        SELECT event_id, event_type
        FROM fanout_queue
        FOR UPDATE SKIP LOCKED
        LIMIT 1
        "#,
    )
    .fetch_optional(&mut *transaction)
    .await?;
    Ok(job.map(|job| (transaction, job)))
}

pub async fn complete_fanout(
    mut transaction: PgTransaction,
    event_id: Uuid,
) -> Result<(), anyhow::Error> {
    sqlx::query("DELETE FROM fanout_queue WHERE event_id = $1")
        .bind(event_id)
        .execute(&mut *transaction)
        .await?;
    transaction.commit().await?;
    Ok(())
}

/// Dead-letter a fan-out job: its single allowed processing attempt failed,
/// so the row is removed instead of being left for endless redelivery. Runs
/// on the pool because the attempt's aborted transaction cannot carry the
/// delete.
pub async fn fail_fanout(pool: &PgPool, event_id: Uuid) -> Result<(), anyhow::Error> {
    sqlx::query("DELETE FROM fanout_queue WHERE event_id = $1")
        .bind(event_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Expand an event into one delivery job per active subscription, atomically
/// and inside the fan-out job's own transaction. Returns how many jobs were
/// created.
pub async fn enqueue_deliveries_for_event(
    transaction: &mut PgTransaction,
    event_id: Uuid,
    event_type: &str,
) -> Result<u64, anyhow::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO delivery_queue (event_id, subscription_id, n_attempts, execute_after, enqueued_at)
        SELECT $1, id, 0, now(), now()
        FROM subscriptions
        WHERE event_type = $2 AND is_active
        ON CONFLICT (event_id, subscription_id) DO NOTHING
        "#,
    )
    .bind(event_id)
    .bind(event_type)
    .execute(&mut **transaction)
    .await?;
    Ok(result.rows_affected())
}

/// Queue a single delivery job, starting a fresh attempt trail. Used by the
/// manual retry path; a no-op if the pair is already queued.
pub async fn enqueue_delivery(
    pool: &PgPool,
    event_id: Uuid,
    subscription_id: Uuid,
) -> Result<(), anyhow::Error> {
    sqlx::query(
        r#"
        INSERT INTO delivery_queue (event_id, subscription_id, n_attempts, execute_after, enqueued_at)
        VALUES ($1, $2, 0, now(), now())
        ON CONFLICT (event_id, subscription_id) DO NOTHING
        "#,
    )
    .bind(event_id)
    .bind(subscription_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Lease a due delivery job; same transaction-as-lease contract as
/// `dequeue_fanout`.
pub async fn dequeue_delivery(
    pool: &PgPool,
) -> Result<Option<(PgTransaction, DeliveryJob)>, anyhow::Error> {
    let mut transaction = pool.begin().await?;
    let job = sqlx::query_as::<_, DeliveryJob>(
        r#"
        SELECT event_id, subscription_id, n_attempts
        FROM delivery_queue
        WHERE execute_after <= now()
        FOR UPDATE SKIP LOCKED
        LIMIT 1
        "#,
    )
    .fetch_optional(&mut *transaction)
    .await?;
    Ok(job.map(|job| (transaction, job)))
}

/// Remove a delivery job, whether it succeeded, was dropped, or exhausted
/// its attempts. The delivery log is the durable record; the queue row is
/// only the pending work.
pub async fn remove_delivery(
    mut transaction: PgTransaction,
    job: &DeliveryJob,
) -> Result<(), anyhow::Error> {
    sqlx::query(
        "DELETE FROM delivery_queue WHERE event_id = $1 AND subscription_id = $2",
    )
    .bind(job.event_id)
    .bind(job.subscription_id)
    .execute(&mut *transaction)
    .await?;
    transaction.commit().await?;
    Ok(())
}

/// Record a spent attempt and push the job into the future per the backoff
/// policy.
pub async fn schedule_retry(
    mut transaction: PgTransaction,
    job: &DeliveryJob,
    attempts_spent: i32,
    delay: std::time::Duration,
) -> Result<(), anyhow::Error> {
    let execute_after = Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
    sqlx::query(
        r#"
        UPDATE delivery_queue
        SET n_attempts = $3, execute_after = $4
        WHERE event_id = $1 AND subscription_id = $2
        "#,
    )
    .bind(job.event_id)
    .bind(job.subscription_id)
    .bind(attempts_spent)
    .bind(execute_after)
    .execute(&mut *transaction)
    .await?;
    transaction.commit().await?;
    Ok(())
}

/// Exponential backoff with jitter: after a failed attempt n the job waits
/// about `base * 2^(n-1)` seconds. A zero base means retry immediately
/// (and skips the jitter), which is what the test suite runs with.
pub fn retry_delay(base_seconds: u64, failed_attempt: i32) -> std::time::Duration {
    let exponent = failed_attempt.saturating_sub(1).clamp(0, 16) as u32;
    let backoff_ms = base_seconds.saturating_mul(1 << exponent).saturating_mul(1000);
    let jitter_ms = if base_seconds == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=1000)
    };
    std::time::Duration::from_millis(backoff_ms + jitter_ms)
}
