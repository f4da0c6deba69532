use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use super::Event;
use crate::domain::EventType;
use crate::domain::IdempotencyKey;

/// Outcome of an ingestion insert: either this request created the row, or
/// an earlier request with the same idempotency key already did.
pub enum EventInsert {
    Created(Event),
    Duplicate(Event),
}

/// Atomic insert-or-report-duplicate. The unique constraint on
/// `idempotency_key` serializes concurrent requests with the same key:
/// exactly one insert wins, every loser observes the winner's row.
#[tracing::instrument(skip(pool, payload))]
pub async fn insert_event(
    pool: &PgPool,
    idempotency_key: &IdempotencyKey,
    event_type: &EventType,
    payload: &serde_json::Value,
) -> Result<EventInsert, anyhow::Error> {
    let inserted = sqlx::query_as::<_, Event>(
        r#"
        INSERT INTO events (id, idempotency_key, event_type, payload, received_at)
        VALUES ($1, $2, $3, $4, now())
        ON CONFLICT (idempotency_key) DO NOTHING
        RETURNING id, idempotency_key, event_type, payload, received_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(idempotency_key.as_ref())
    .bind(event_type.as_ref())
    .bind(payload)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some(event) => Ok(EventInsert::Created(event)),
        None => {
            // events are never deleted by the relay, so the winning row is
            // guaranteed to be readable here
            let existing = get_event_by_idempotency_key(pool, idempotency_key)
                .await?
                .context("idempotency key conflicted but the stored event is missing")?;
            Ok(EventInsert::Duplicate(existing))
        }
    }
}

pub async fn get_event(pool: &PgPool, id: Uuid) -> Result<Option<Event>, anyhow::Error> {
    let event = sqlx::query_as::<_, Event>(
        "SELECT id, idempotency_key, event_type, payload, received_at FROM events WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(event)
}

async fn get_event_by_idempotency_key(
    pool: &PgPool,
    idempotency_key: &IdempotencyKey,
) -> Result<Option<Event>, anyhow::Error> {
    let event = sqlx::query_as::<_, Event>(
        r#"
        SELECT id, idempotency_key, event_type, payload, received_at
        FROM events
        WHERE idempotency_key = $1
        "#,
    )
    .bind(idempotency_key.as_ref())
    .fetch_optional(pool)
    .await?;
    Ok(event)
}
