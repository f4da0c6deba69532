use secrecy::ExposeSecret;
use secrecy::Secret;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::QueryBuilder;
use uuid::Uuid;

use super::Subscription;
use crate::domain::EventType;
use crate::domain::TargetUrl;

/// Name of the partial unique index behind the one-active-subscription-per-
/// route rule; 23505 violations are classified by it.
const ACTIVE_ROUTE_INDEX: &str = "subscriptions_active_route_idx";

#[derive(thiserror::Error, Debug)]
pub enum SubscriptionError {
    #[error("an active subscription for this event type and target URL already exists")]
    DuplicateRoute,
    #[error(transparent)]
    Unexpected(#[from] sqlx::Error),
}

pub struct NewSubscription {
    pub event_type: EventType,
    pub target_url: TargetUrl,
    pub secret_key: Secret<String>,
}

/// Optional-field patch; `None` leaves a column untouched.
#[derive(Default)]
pub struct SubscriptionPatch {
    pub event_type: Option<EventType>,
    pub target_url: Option<TargetUrl>,
    pub is_active: Option<bool>,
}

pub struct SubscriptionFilter {
    pub event_type: Option<String>,
    pub is_active: Option<bool>,
    pub page: i64,
    pub limit: i64,
}

fn is_duplicate_route(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.constraint())
        .map(|constraint| constraint == ACTIVE_ROUTE_INDEX)
        .unwrap_or(false)
}

#[tracing::instrument(skip_all, fields(event_type = %new.event_type))]
pub async fn insert_subscription(
    pool: &PgPool,
    new: &NewSubscription,
) -> Result<Subscription, SubscriptionError> {
    sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions
            (id, event_type, target_url, secret_key, is_active, created_at, updated_at)
        VALUES ($1, $2, $3, $4, TRUE, now(), now())
        RETURNING id, event_type, target_url, secret_key, is_active, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.event_type.as_ref())
    .bind(new.target_url.as_ref())
    .bind(new.secret_key.expose_secret())
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if is_duplicate_route(&e) {
            SubscriptionError::DuplicateRoute
        } else {
            e.into()
        }
    })
}

/// Returns `None` when no subscription with `id` exists.
pub async fn update_subscription(
    pool: &PgPool,
    id: Uuid,
    patch: &SubscriptionPatch,
) -> Result<Option<Subscription>, SubscriptionError> {
    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET
            event_type = COALESCE($2, event_type),
            target_url = COALESCE($3, target_url),
            is_active = COALESCE($4, is_active),
            updated_at = now()
        WHERE id = $1
        RETURNING id, event_type, target_url, secret_key, is_active, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(patch.event_type.as_ref().map(|t| t.as_ref()))
    .bind(patch.target_url.as_ref().map(|u| u.as_ref()))
    .bind(patch.is_active)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        if is_duplicate_route(&e) {
            SubscriptionError::DuplicateRoute
        } else {
            e.into()
        }
    })
}

/// Hard delete. Returns whether a row was removed. Existing delivery logs
/// keep their snapshot of the route.
pub async fn delete_subscription(pool: &PgPool, id: Uuid) -> Result<bool, anyhow::Error> {
    let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_subscription(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<Subscription>, anyhow::Error> {
    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        SELECT id, event_type, target_url, secret_key, is_active, created_at, updated_at
        FROM subscriptions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(subscription)
}

/// Filtered page plus the total row count for the same filter.
pub async fn list_subscriptions(
    pool: &PgPool,
    filter: &SubscriptionFilter,
) -> Result<(Vec<Subscription>, i64), anyhow::Error> {
    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &SubscriptionFilter) {
        if let Some(event_type) = &filter.event_type {
            builder.push(" AND event_type = ").push_bind(event_type.clone());
        }
        if let Some(is_active) = filter.is_active {
            builder.push(" AND is_active = ").push_bind(is_active);
        }
    }

    let mut builder = QueryBuilder::new(
        "SELECT id, event_type, target_url, secret_key, is_active, created_at, updated_at \
         FROM subscriptions WHERE TRUE",
    );
    push_filters(&mut builder, filter);
    builder
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind((filter.page - 1) * filter.limit);
    let subscriptions = builder
        .build_query_as::<Subscription>()
        .fetch_all(pool)
        .await?;

    let mut count_builder =
        QueryBuilder::new("SELECT COUNT(*) FROM subscriptions WHERE TRUE");
    push_filters(&mut count_builder, filter);
    let total: i64 = count_builder.build_query_scalar().fetch_one(pool).await?;

    Ok((subscriptions, total))
}
