mod event_type;
mod idempotency_key;
mod target_url;

pub use event_type::EventType;
pub use idempotency_key::IdempotencyKey;
pub use target_url::TargetUrl;
