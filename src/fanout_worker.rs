//! Fan-out: expands one accepted event into one delivery job per active
//! subscription.

use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;

use crate::configuration::Settings;
use crate::queue;
use crate::queue::ExecutionOutcome;
use crate::startup::get_connection_pool;

/// Run one fan-out job to completion, if any is queued.
///
/// The delivery-job inserts happen in the same transaction as the job's
/// completion, so a crash either leaves the fan-out job untouched (it will
/// be redelivered) or produces the full set of delivery jobs.
///
/// A fan-out job gets exactly one processing attempt: when the expansion
/// itself errors, the job is dead-lettered rather than left for redelivery,
/// so a persistently failing event cannot loop forever. Redelivery remains
/// only for crashes and stalls, where no code ran to classify the failure.
#[tracing::instrument(skip_all, fields(event_id = tracing::field::Empty), err)]
pub async fn try_execute_task(pool: &PgPool) -> Result<ExecutionOutcome, anyhow::Error> {
    let Some((mut transaction, job)) = queue::dequeue_fanout(pool).await? else {
        return Ok(ExecutionOutcome::EmptyQueue);
    };
    tracing::Span::current().record("event_id", tracing::field::display(job.event_id));

    match queue::enqueue_deliveries_for_event(&mut transaction, job.event_id, &job.event_type)
        .await
    {
        Ok(enqueued) => {
            if enqueued == 0 {
                tracing::info!(
                    event_type = %job.event_type,
                    "no active subscribers for this event type"
                );
            } else {
                tracing::info!(deliveries = enqueued, "fanned out");
            }
            queue::complete_fanout(transaction, job.event_id).await?;
            Ok(ExecutionOutcome::TaskCompleted)
        }
        Err(e) => {
            tracing::error!(
                error.cause_chain = ?e,
                event_id = %job.event_id,
                "fan-out attempt failed; dead-lettering the job"
            );
            // the aborted transaction cannot carry the removal
            transaction.rollback().await?;
            queue::fail_fanout(pool, job.event_id).await?;
            Ok(ExecutionOutcome::TaskFailed)
        }
    }
}

async fn worker_loop(
    pool: PgPool,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
    loop {
        // quiesce point: checked only between jobs, never mid-attempt
        if *shutdown.borrow() {
            return Ok(());
        }
        match try_execute_task(&pool).await {
            Ok(ExecutionOutcome::TaskCompleted | ExecutionOutcome::TaskFailed) => {}
            Ok(ExecutionOutcome::EmptyQueue) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                    _ = shutdown.changed() => {}
                }
            }
            // transient store trouble; back off and retry
            Err(_) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
}

pub async fn run(
    configuration: Settings,
    shutdown: watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
    let pool = get_connection_pool(&configuration.database);
    worker_loop(pool, shutdown).await
}
