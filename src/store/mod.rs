//! Persistence layer. All multi-row invariants live in postgres constraints
//! (unique `idempotency_key`, the active-route partial index); everything
//! here is a thin, typed surface over them.

mod delivery_logs;
mod events;
mod subscriptions;

pub use delivery_logs::*;
pub use events::*;
pub use subscriptions::*;

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

/// An immutable producer event. Never updated after insert.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Event {
    pub id: Uuid,
    pub idempotency_key: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub event_type: String,
    pub target_url: String,
    pub secret_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row per delivery attempt. `target_url` is a snapshot taken at attempt
/// time so the audit trail survives subscription hard-deletes.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeliveryLog {
    pub id: Uuid,
    pub event_id: Uuid,
    pub subscription_id: Uuid,
    pub target_url: String,
    pub status: String,
    pub attempt_count: i32,
    pub attempted_at: DateTime<Utc>,
    pub response_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "success" => Ok(DeliveryStatus::Success),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("Invalid delivery status: {other:?}")),
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
