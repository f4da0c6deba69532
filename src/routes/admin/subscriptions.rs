use actix_web::web;
use actix_web::HttpResponse;
use chrono::DateTime;
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::EventType;
use crate::domain::TargetUrl;
use crate::routes::codes;
use crate::routes::pagination;
use crate::routes::ApiError;
use crate::routes::Page;
use crate::signing;
use crate::store;
use crate::store::NewSubscription;
use crate::store::Subscription;
use crate::store::SubscriptionError;
use crate::store::SubscriptionFilter;
use crate::store::SubscriptionPatch;

/// The wire shape of a subscription. `secret_key` is deliberately absent;
/// it is only ever disclosed by `create_subscription`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDto {
    pub id: Uuid,
    pub event_type: String,
    pub target_url: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionDto {
    fn from(subscription: Subscription) -> Self {
        Self {
            id: subscription.id,
            event_type: subscription.event_type,
            target_url: subscription.target_url,
            is_active: subscription.is_active,
            created_at: subscription.created_at,
            updated_at: subscription.updated_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSubscriptionDto {
    #[serde(flatten)]
    pub subscription: SubscriptionDto,
    pub secret_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionBody {
    event_type: String,
    target_url: String,
}

fn parse_event_type(raw: String) -> Result<EventType, ApiError> {
    EventType::parse(raw).map_err(|e| ApiError::validation(codes::VALIDATION_ERROR, e))
}

fn parse_target_url(raw: String) -> Result<TargetUrl, ApiError> {
    TargetUrl::parse(raw).map_err(|e| ApiError::validation(codes::INVALID_URL, e))
}

fn map_subscription_error(e: SubscriptionError) -> ApiError {
    match e {
        SubscriptionError::DuplicateRoute => {
            ApiError::conflict(codes::DUPLICATE_SUBSCRIPTION, e.to_string())
        }
        SubscriptionError::Unexpected(e) => ApiError::Unexpected(e.into()),
    }
}

/// `POST /api/v1/admin/subscriptions`
///
/// The generated secret is returned here and never again.
#[tracing::instrument(name = "Creating subscription", skip_all)]
pub async fn create_subscription(
    body: web::Json<CreateSubscriptionBody>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let new = NewSubscription {
        event_type: parse_event_type(body.event_type)?,
        target_url: parse_target_url(body.target_url)?,
        secret_key: signing::generate_secret_key(),
    };

    let subscription = store::insert_subscription(&pool, &new)
        .await
        .map_err(map_subscription_error)?;

    let secret_key = new.secret_key.expose_secret().clone();
    Ok(HttpResponse::Created().json(CreatedSubscriptionDto {
        subscription: subscription.into(),
        secret_key,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSubscriptionsQuery {
    page: Option<i64>,
    limit: Option<i64>,
    event_type: Option<String>,
    is_active: Option<bool>,
}

/// `GET /api/v1/admin/subscriptions`
pub async fn list_subscriptions(
    query: web::Query<ListSubscriptionsQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let query = query.into_inner();
    let (page, limit) = pagination(query.page, query.limit);
    let filter = SubscriptionFilter {
        event_type: query.event_type,
        is_active: query.is_active,
        page,
        limit,
    };

    let (subscriptions, total) = store::list_subscriptions(&pool, &filter).await?;
    Ok(HttpResponse::Ok().json(Page::<SubscriptionDto> {
        data: subscriptions.into_iter().map(Into::into).collect(),
        page,
        limit,
        total,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubscriptionBody {
    event_type: Option<String>,
    target_url: Option<String>,
    is_active: Option<bool>,
}

/// `PUT /api/v1/admin/subscriptions/{id}` — partial update; absent fields
/// are left untouched. The secret key cannot be changed.
#[tracing::instrument(name = "Updating subscription", skip_all)]
pub async fn update_subscription(
    path: web::Path<Uuid>,
    body: web::Json<UpdateSubscriptionBody>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let body = body.into_inner();

    let patch = SubscriptionPatch {
        event_type: body.event_type.map(parse_event_type).transpose()?,
        target_url: body.target_url.map(parse_target_url).transpose()?,
        is_active: body.is_active,
    };

    let updated = store::update_subscription(&pool, id, &patch)
        .await
        .map_err(map_subscription_error)?;
    match updated {
        Some(subscription) => Ok(HttpResponse::Ok().json(SubscriptionDto::from(subscription))),
        None => Err(ApiError::not_found(
            codes::SUBSCRIPTION_NOT_FOUND,
            format!("no subscription with id {id}"),
        )),
    }
}

/// `DELETE /api/v1/admin/subscriptions/{id}` — hard delete. Delivery logs
/// survive; queued deliveries for the subscription are dropped by the worker.
#[tracing::instrument(name = "Deleting subscription", skip_all)]
pub async fn delete_subscription(
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    if !store::delete_subscription(&pool, id).await? {
        return Err(ApiError::not_found(
            codes::SUBSCRIPTION_NOT_FOUND,
            format!("no subscription with id {id}"),
        ));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "id": id, "deleted": true })))
}
