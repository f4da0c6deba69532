use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::QueryBuilder;
use uuid::Uuid;

use super::DeliveryLog;
use super::DeliveryStatus;

#[derive(thiserror::Error, Debug)]
pub enum DeliveryLogError {
    /// Terminal rows are never mutated; finishing anything but a `pending`
    /// row (or a row that does not exist) is a bug in the caller.
    #[error("delivery log {0} is not pending")]
    NotPending(Uuid),
    #[error(transparent)]
    Unexpected(#[from] sqlx::Error),
}

/// Terminal result of one delivery attempt. `Success` always carries the
/// 2xx status code; `Failed` carries whatever was observed before the
/// attempt died.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success {
        status_code: i32,
        body: String,
    },
    Failed {
        status_code: Option<i32>,
        body: Option<String>,
        error: String,
    },
}

/// Open a new `pending` row for an attempt. Every attempt gets its own row;
/// rows are never upserted.
pub async fn create_delivery_log(
    pool: &PgPool,
    event_id: Uuid,
    subscription_id: Uuid,
    target_url: &str,
    attempt_count: i32,
) -> Result<Uuid, anyhow::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO delivery_logs
            (id, event_id, subscription_id, target_url, status, attempt_count, attempted_at)
        VALUES ($1, $2, $3, $4, 'pending', $5, now())
        "#,
    )
    .bind(id)
    .bind(event_id)
    .bind(subscription_id)
    .bind(target_url)
    .bind(attempt_count)
    .execute(pool)
    .await?;
    Ok(id)
}

/// Transition a `pending` row to its terminal state. The `status = 'pending'`
/// guard in the UPDATE is what enforces the state machine under concurrent
/// writers.
pub async fn finish_delivery_log(
    pool: &PgPool,
    log_id: Uuid,
    outcome: &AttemptOutcome,
) -> Result<(), DeliveryLogError> {
    let (status, status_code, body, error) = match outcome {
        AttemptOutcome::Success { status_code, body } => (
            DeliveryStatus::Success,
            Some(*status_code),
            Some(body.as_str()),
            None,
        ),
        AttemptOutcome::Failed {
            status_code,
            body,
            error,
        } => (
            DeliveryStatus::Failed,
            *status_code,
            body.as_deref(),
            Some(error.as_str()),
        ),
    };

    let result = sqlx::query(
        r#"
        UPDATE delivery_logs
        SET status = $2, response_status_code = $3, response_body = $4, error_message = $5
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(log_id)
    .bind(status.as_str())
    .bind(status_code)
    .bind(body)
    .bind(error)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DeliveryLogError::NotPending(log_id));
    }
    Ok(())
}

pub async fn get_delivery_log(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<DeliveryLog>, anyhow::Error> {
    let log = sqlx::query_as::<_, DeliveryLog>(
        r#"
        SELECT id, event_id, subscription_id, target_url, status, attempt_count,
               attempted_at, response_status_code, response_body, error_message
        FROM delivery_logs
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(log)
}

/// Full attempt history of one event, newest first.
pub async fn list_delivery_logs_for_event(
    pool: &PgPool,
    event_id: Uuid,
) -> Result<Vec<DeliveryLog>, anyhow::Error> {
    let logs = sqlx::query_as::<_, DeliveryLog>(
        r#"
        SELECT id, event_id, subscription_id, target_url, status, attempt_count,
               attempted_at, response_status_code, response_body, error_message
        FROM delivery_logs
        WHERE event_id = $1
        ORDER BY attempted_at DESC
        "#,
    )
    .bind(event_id)
    .fetch_all(pool)
    .await?;
    Ok(logs)
}

pub struct DeliveryLogFilter {
    pub event_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub status: Option<DeliveryStatus>,
    pub event_type: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub page: i64,
    pub limit: i64,
}

/// Filtered page plus the total row count for the same filter. The events
/// join only exists for the `event_type` filter.
pub async fn list_delivery_logs(
    pool: &PgPool,
    filter: &DeliveryLogFilter,
) -> Result<(Vec<DeliveryLog>, i64), anyhow::Error> {
    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &DeliveryLogFilter) {
        if let Some(event_id) = filter.event_id {
            builder.push(" AND d.event_id = ").push_bind(event_id);
        }
        if let Some(subscription_id) = filter.subscription_id {
            builder
                .push(" AND d.subscription_id = ")
                .push_bind(subscription_id);
        }
        if let Some(status) = filter.status {
            builder.push(" AND d.status = ").push_bind(status.as_str());
        }
        if let Some(event_type) = &filter.event_type {
            builder
                .push(" AND e.event_type = ")
                .push_bind(event_type.clone());
        }
        if let Some(start) = filter.start_date {
            builder.push(" AND d.attempted_at >= ").push_bind(start);
        }
        if let Some(end) = filter.end_date {
            builder.push(" AND d.attempted_at <= ").push_bind(end);
        }
    }

    let mut builder = QueryBuilder::new(
        "SELECT d.id, d.event_id, d.subscription_id, d.target_url, d.status, \
         d.attempt_count, d.attempted_at, d.response_status_code, d.response_body, \
         d.error_message \
         FROM delivery_logs d JOIN events e ON e.id = d.event_id WHERE TRUE",
    );
    push_filters(&mut builder, filter);
    builder
        .push(" ORDER BY d.attempted_at DESC LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind((filter.page - 1) * filter.limit);
    let logs = builder.build_query_as::<DeliveryLog>().fetch_all(pool).await?;

    let mut count_builder = QueryBuilder::new(
        "SELECT COUNT(*) FROM delivery_logs d JOIN events e ON e.id = d.event_id WHERE TRUE",
    );
    push_filters(&mut count_builder, filter);
    let total: i64 = count_builder.build_query_scalar().fetch_one(pool).await?;

    Ok((logs, total))
}

#[derive(Debug, sqlx::FromRow)]
pub struct RelayStats {
    pub events_total: i64,
    pub subscriptions_total: i64,
    pub subscriptions_active: i64,
    pub deliveries_total: i64,
    pub deliveries_success: i64,
    pub deliveries_failed: i64,
    pub deliveries_pending: i64,
}

pub async fn aggregate_stats(pool: &PgPool) -> Result<RelayStats, anyhow::Error> {
    let stats = sqlx::query_as::<_, RelayStats>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM events) AS events_total,
            (SELECT COUNT(*) FROM subscriptions) AS subscriptions_total,
            (SELECT COUNT(*) FROM subscriptions WHERE is_active) AS subscriptions_active,
            COUNT(*) AS deliveries_total,
            COUNT(*) FILTER (WHERE status = 'success') AS deliveries_success,
            COUNT(*) FILTER (WHERE status = 'failed') AS deliveries_failed,
            COUNT(*) FILTER (WHERE status = 'pending') AS deliveries_pending
        FROM delivery_logs
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(stats)
}
