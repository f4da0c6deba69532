//! The delivery worker: one dequeue, one signed POST, one terminal log row.

use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::configuration::DeliverySettings;
use crate::configuration::Settings;
use crate::queue;
use crate::queue::ExecutionOutcome;
use crate::startup::get_connection_pool;
use crate::store;
use crate::store::AttemptOutcome;
use crate::store::Event;
use crate::webhook_client::WebhookClient;

/// Stored response bodies are capped at this many bytes.
const RESPONSE_BODY_CAP: usize = 1000;

/// The canonical JSON document POSTed to subscribers. Field order and names
/// are part of the contract; the signature is computed over this exact
/// serialization.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookEnvelope<'a> {
    id: Uuid,
    event_type: &'a str,
    payload: &'a serde_json::Value,
    received_at: DateTime<Utc>,
    idempotency_key: &'a str,
}

fn envelope_body(event: &Event) -> Result<String, serde_json::Error> {
    serde_json::to_string(&WebhookEnvelope {
        id: event.id,
        event_type: &event.event_type,
        payload: &event.payload,
        received_at: event.received_at,
        idempotency_key: &event.idempotency_key,
    })
}

fn truncate_response_body(body: String) -> String {
    if body.len() <= RESPONSE_BODY_CAP {
        return body;
    }
    let mut end = RESPONSE_BODY_CAP;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// Run one delivery attempt to completion, if any job is due.
///
/// The queue transaction is held across the attempt; the job is released
/// (completed, rescheduled, or abandoned) only after the terminal log row is
/// written, so a crash at any point lets the queue redeliver.
#[tracing::instrument(
    skip_all,
    fields(
        event_id = tracing::field::Empty,
        subscription_id = tracing::field::Empty,
        attempt = tracing::field::Empty,
    ),
    err
)]
pub async fn try_execute_task(
    pool: &PgPool,
    client: &WebhookClient,
    settings: &DeliverySettings,
) -> Result<ExecutionOutcome, anyhow::Error> {
    let Some((transaction, job)) = queue::dequeue_delivery(pool).await? else {
        return Ok(ExecutionOutcome::EmptyQueue);
    };
    let attempt = job.n_attempts + 1;
    tracing::Span::current()
        .record("event_id", tracing::field::display(job.event_id))
        .record("subscription_id", tracing::field::display(job.subscription_id))
        .record("attempt", attempt);

    let Some(event) = store::get_event(pool, job.event_id).await? else {
        // nothing to deliver and nothing to retry against; not a log-worthy
        // attempt, but worth an operator-visible error
        tracing::error!("delivery job references a missing event; dropping job");
        queue::remove_delivery(transaction, &job).await?;
        return Ok(ExecutionOutcome::TaskCompleted);
    };

    let subscription = store::get_subscription(pool, job.subscription_id).await?;
    let Some(subscription) = subscription.filter(|s| s.is_active) else {
        // the subscriber left (deleted or deactivated) while the job was
        // queued; drop without an audit row
        tracing::info!("subscription inactive or gone; dropping delivery");
        queue::remove_delivery(transaction, &job).await?;
        return Ok(ExecutionOutcome::TaskCompleted);
    };

    let log_id = store::create_delivery_log(
        pool,
        event.id,
        subscription.id,
        &subscription.target_url,
        attempt,
    )
    .await?;

    let body = envelope_body(&event)?;
    let outcome = match client
        .post_event(
            &subscription.target_url,
            &subscription.secret_key,
            &event.event_type,
            event.id,
            body,
        )
        .await
    {
        Ok(response) => {
            let status_code = response.status().as_u16() as i32;
            let body = truncate_response_body(response.text().await.unwrap_or_default());
            if (200..300).contains(&status_code) {
                AttemptOutcome::Success { status_code, body }
            } else {
                AttemptOutcome::Failed {
                    status_code: Some(status_code),
                    body: Some(body),
                    error: format!("HTTP {status_code}"),
                }
            }
        }
        // DNS, connect, TLS, timeout, aborted mid-body
        Err(e) => AttemptOutcome::Failed {
            status_code: None,
            body: None,
            error: e.to_string(),
        },
    };

    store::finish_delivery_log(pool, log_id, &outcome).await?;

    match &outcome {
        AttemptOutcome::Success { status_code, .. } => {
            tracing::info!(status_code = *status_code, "delivered");
            queue::remove_delivery(transaction, &job).await?;
        }
        AttemptOutcome::Failed { error, .. } => {
            if attempt >= settings.max_retry_attempts {
                tracing::error!(
                    error = %error,
                    attempts = attempt,
                    "delivery permanently failed; giving up"
                );
                queue::remove_delivery(transaction, &job).await?;
            } else {
                let delay = queue::retry_delay(settings.retry_backoff_seconds, attempt);
                tracing::warn!(
                    error = %error,
                    retry_in_ms = delay.as_millis() as u64,
                    "delivery failed; scheduling retry"
                );
                queue::schedule_retry(transaction, &job, attempt, delay).await?;
            }
        }
    }

    Ok(ExecutionOutcome::TaskCompleted)
}

async fn worker_loop(
    pool: PgPool,
    client: WebhookClient,
    settings: DeliverySettings,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
    loop {
        // quiesce point: checked only between jobs, so an in-flight attempt
        // always finishes and writes its terminal log before the loop exits
        if *shutdown.borrow() {
            return Ok(());
        }
        match try_execute_task(&pool, &client, &settings).await {
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

/// Spawn `worker_concurrency` delivery loops sharing one pool and one HTTP
/// client. Resolves once every loop has exited: on shutdown after each has
/// quiesced, otherwise only if a loop dies.
pub async fn run(
    configuration: Settings,
    shutdown: watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
    let pool = get_connection_pool(&configuration.database);
    let client = WebhookClient::new(configuration.delivery.timeout());

    let mut workers = JoinSet::new();
    for _ in 0..configuration.delivery.worker_concurrency.max(1) {
        let pool = pool.clone();
        let client = client.clone();
        let settings = configuration.delivery.clone();
        workers.spawn(worker_loop(pool, client, settings, shutdown.clone()));
    }
    while let Some(joined) = workers.join_next().await {
        joined??;
    }
    Ok(())
}
