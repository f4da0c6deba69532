use actix_web::web;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::codes;
use super::ApiError;
use super::DeliveryLogDto;
use crate::domain::EventType;
use crate::domain::IdempotencyKey;
use crate::queue;
use crate::store;
use crate::store::EventInsert;

/// Serialized payload cap (1 MiB). The surrounding JSON envelope is capped
/// separately by the server's `JsonConfig`.
const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

pub const IDEMPOTENCY_KEY_HEADER: &str = "X-Idempotency-Key";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestBody {
    event_type: String,
    payload: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAccepted {
    pub event_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub duplicate: bool,
    pub processing_ms: u64,
}

fn extract_idempotency_key(request: &HttpRequest) -> Result<IdempotencyKey, ApiError> {
    let raw = request
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    IdempotencyKey::try_from(raw.to_string()).map_err(|_| {
        ApiError::validation(
            codes::MISSING_IDEMPOTENCY_KEY,
            format!("the {IDEMPOTENCY_KEY_HEADER} header is required and must be non-empty"),
        )
    })
}

/// `POST /api/v1/events`
///
/// Accepting an event means: it is durably stored under its idempotency key.
/// Fan-out is enqueued afterwards; if that enqueue fails the response is
/// still 202 (the event is safe) and the inconsistency is logged for the
/// operator.
#[tracing::instrument(
    name = "Ingesting event",
    skip_all,
    fields(
        idempotency_key = tracing::field::Empty,
        event_type = tracing::field::Empty,
    )
)]
pub async fn ingest_event(
    request: HttpRequest,
    body: web::Json<IngestBody>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let started = std::time::Instant::now();
    let body = body.into_inner();

    let idempotency_key = extract_idempotency_key(&request)?;
    tracing::Span::current().record(
        "idempotency_key",
        tracing::field::display(idempotency_key.as_ref()),
    );

    let event_type = EventType::parse(body.event_type)
        .map_err(|e| ApiError::validation(codes::VALIDATION_ERROR, e))?;
    tracing::Span::current().record("event_type", tracing::field::display(&event_type));

    if !body.payload.is_object() {
        return Err(ApiError::validation(
            codes::VALIDATION_ERROR,
            "payload must be a JSON object",
        ));
    }
    let serialized_payload = serde_json::to_vec(&body.payload)
        .map_err(|e| ApiError::Unexpected(e.into()))?;
    if serialized_payload.len() > MAX_PAYLOAD_BYTES {
        return Err(ApiError::validation(
            codes::VALIDATION_ERROR,
            format!("payload exceeds {MAX_PAYLOAD_BYTES} bytes when serialized"),
        ));
    }

    let (event, duplicate) =
        match store::insert_event(&pool, &idempotency_key, &event_type, &body.payload).await? {
            EventInsert::Created(event) => {
                // deliberately outside any transaction with the insert: the
                // event is already durable, and a lost fan-out is an
                // operator-recoverable inconsistency, not a client error
                if let Err(e) = queue::enqueue_fanout(&pool, event.id, &event.event_type).await
                {
                    tracing::warn!(
                        error.cause_chain = ?e,
                        event_id = %event.id,
                        "event stored but fan-out enqueue failed"
                    );
                }
                (event, false)
            }
            EventInsert::Duplicate(event) => (event, true),
        };

    Ok(HttpResponse::Accepted().json(EventAccepted {
        event_id: event.id,
        received_at: event.received_at,
        duplicate,
        processing_ms: started.elapsed().as_millis() as u64,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    pub id: Uuid,
    pub idempotency_key: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub delivery_logs: Vec<DeliveryLogDto>,
}

/// `GET /api/v1/events/{event_id}` — the event plus its full attempt
/// history, newest attempt first.
pub async fn event_details(
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let event_id = path.into_inner();
    let Some(event) = store::get_event(&pool, event_id).await? else {
        return Err(ApiError::not_found(
            codes::EVENT_NOT_FOUND,
            format!("no event with id {event_id}"),
        ));
    };
    let delivery_logs = store::list_delivery_logs_for_event(&pool, event_id).await?;

    Ok(HttpResponse::Ok().json(EventDetail {
        id: event.id,
        idempotency_key: event.idempotency_key,
        event_type: event.event_type,
        payload: event.payload,
        received_at: event.received_at,
        delivery_logs: delivery_logs.into_iter().map(Into::into).collect(),
    }))
}
