use actix_web::web;
use actix_web::HttpResponse;
use serde::Serialize;
use sqlx::PgPool;

use crate::routes::ApiError;
use crate::store;

#[derive(Serialize)]
pub struct StatsDto {
    pub events: EventStats,
    pub subscriptions: SubscriptionStats,
    pub deliveries: DeliveryStats,
}

#[derive(Serialize)]
pub struct EventStats {
    pub total: i64,
}

#[derive(Serialize)]
pub struct SubscriptionStats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStats {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub pending: i64,
    /// success / total × 100; 0 when nothing has been attempted yet
    pub success_rate: f64,
}

/// `GET /api/v1/admin/stats`
pub async fn stats(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let stats = store::aggregate_stats(&pool).await?;
    let success_rate = if stats.deliveries_total == 0 {
        0.0
    } else {
        stats.deliveries_success as f64 / stats.deliveries_total as f64 * 100.0
    };

    Ok(HttpResponse::Ok().json(StatsDto {
        events: EventStats {
            total: stats.events_total,
        },
        subscriptions: SubscriptionStats {
            total: stats.subscriptions_total,
            active: stats.subscriptions_active,
            inactive: stats.subscriptions_total - stats.subscriptions_active,
        },
        deliveries: DeliveryStats {
            total: stats.deliveries_total,
            success: stats.deliveries_success,
            failed: stats.deliveries_failed,
            pending: stats.deliveries_pending,
            success_rate,
        },
    }))
}
