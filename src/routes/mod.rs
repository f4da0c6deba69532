pub mod admin;
mod events;
mod health_check;

pub use events::*;
pub use health_check::*;

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use actix_web::ResponseError;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::store::DeliveryLog;

/// Stable error codes surfaced on the wire.
pub mod codes {
    pub const MISSING_IDEMPOTENCY_KEY: &str = "MISSING_IDEMPOTENCY_KEY";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const INVALID_URL: &str = "INVALID_URL";
    pub const DUPLICATE_SUBSCRIPTION: &str = "DUPLICATE_SUBSCRIPTION";
    pub const EVENT_NOT_FOUND: &str = "EVENT_NOT_FOUND";
    pub const SUBSCRIPTION_NOT_FOUND: &str = "SUBSCRIPTION_NOT_FOUND";
    pub const LOG_NOT_FOUND: &str = "LOG_NOT_FOUND";
    pub const INVALID_RETRY: &str = "INVALID_RETRY";
    pub const INACTIVE_SUBSCRIPTION: &str = "INACTIVE_SUBSCRIPTION";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Walk and print the full source chain, not just the outermost error.
pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{e}\n")?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{cause}")?;
        current = cause.source();
    }
    Ok(())
}

/// Error type shared by all handlers. Renders `{"error":{"code","message"}}`
/// bodies; internal errors keep their detail out of the response and in the
/// log.
#[derive(thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },
    #[error("{message}")]
    NotFound { code: &'static str, message: String },
    #[error("{message}")]
    Conflict { code: &'static str, message: String },
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. }
            | Self::NotFound { code, .. }
            | Self::Conflict { code, .. } => code,
            Self::Unexpected(_) => codes::INTERNAL_ERROR,
        }
    }
}

impl std::fmt::Debug for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: &'a str,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            Self::Unexpected(_) => "something went wrong".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: &message,
            },
        })
    }
}

/// List-endpoint envelope.
#[derive(Serialize)]
pub struct Page<T: Serialize> {
    pub data: Vec<T>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

/// Page/limit query parameters, clamped to sane bounds.
pub fn pagination(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(20).clamp(1, 100);
    (page, limit)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLogDto {
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

impl From<DeliveryLog> for DeliveryLogDto {
    fn from(log: DeliveryLog) -> Self {
        Self {
            id: log.id,
            event_id: log.event_id,
            subscription_id: log.subscription_id,
            target_url: log.target_url,
            status: log.status,
            attempt_count: log.attempt_count,
            attempted_at: log.attempted_at,
            response_status_code: log.response_status_code,
            response_body: log.response_body,
            error_message: log.error_message,
        }
    }
}
