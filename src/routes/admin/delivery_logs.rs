use std::str::FromStr;

use actix_web::web;
use actix_web::HttpResponse;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::queue;
use crate::routes::codes;
use crate::routes::pagination;
use crate::routes::ApiError;
use crate::routes::DeliveryLogDto;
use crate::routes::Page;
use crate::store;
use crate::store::DeliveryLogFilter;
use crate::store::DeliveryStatus;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDeliveryLogsQuery {
    page: Option<i64>,
    limit: Option<i64>,
    event_id: Option<Uuid>,
    subscription_id: Option<Uuid>,
    status: Option<String>,
    event_type: Option<String>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
}

/// `GET /api/v1/admin/delivery-logs`
pub async fn list_delivery_logs(
    query: web::Query<ListDeliveryLogsQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let query = query.into_inner();
    let (page, limit) = pagination(query.page, query.limit);

    let status = query
        .status
        .map(|raw| DeliveryStatus::from_str(&raw))
        .transpose()
        .map_err(|e| ApiError::validation(codes::VALIDATION_ERROR, e))?;

    let filter = DeliveryLogFilter {
        event_id: query.event_id,
        subscription_id: query.subscription_id,
        status,
        event_type: query.event_type,
        start_date: query.start_date,
        end_date: query.end_date,
        page,
        limit,
    };

    let (logs, total) = store::list_delivery_logs(&pool, &filter).await?;
    Ok(HttpResponse::Ok().json(Page::<DeliveryLogDto> {
        data: logs.into_iter().map(Into::into).collect(),
        page,
        limit,
        total,
    }))
}

/// `POST /api/v1/admin/delivery-logs/{id}/retry`
///
/// Re-queues the (event, subscription) pair behind a failed (or stuck
/// pending) log. The old rows are untouched; the new trail starts again at
/// attempt 1 under the normal retry policy.
#[tracing::instrument(name = "Manually retrying delivery", skip_all)]
pub async fn retry_delivery(
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let log_id = path.into_inner();
    let Some(log) = store::get_delivery_log(&pool, log_id).await? else {
        return Err(ApiError::not_found(
            codes::LOG_NOT_FOUND,
            format!("no delivery log with id {log_id}"),
        ));
    };

    if log.status == DeliveryStatus::Success.as_str() {
        return Err(ApiError::validation(
            codes::INVALID_RETRY,
            "this delivery already succeeded",
        ));
    }

    let Some(subscription) = store::get_subscription(&pool, log.subscription_id).await? else {
        return Err(ApiError::not_found(
            codes::SUBSCRIPTION_NOT_FOUND,
            format!("subscription {} no longer exists", log.subscription_id),
        ));
    };
    if !subscription.is_active {
        return Err(ApiError::validation(
            codes::INACTIVE_SUBSCRIPTION,
            "the subscription is inactive; activate it before retrying",
        ));
    }

    queue::enqueue_delivery(&pool, log.event_id, log.subscription_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "eventId": log.event_id,
        "subscriptionId": log.subscription_id,
        "queued": true,
    })))
}
