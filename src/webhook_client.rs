use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use uuid::Uuid;

use crate::signing;

pub const USER_AGENT: &str = "webhook-relay/1.0";

/// Outbound HTTP client for subscriber endpoints. One instance is shared by
/// all delivery workers so connections are reused; the per-attempt timeout
/// is baked into the inner `Client`.
#[derive(Clone)]
pub struct WebhookClient {
    http_client: Client,
}

impl WebhookClient {
    pub fn new(timeout: std::time::Duration) -> Self {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .expect("failed to build the outbound HTTP client");
        Self { http_client }
    }

    /// POST `body` to `target_url`, signed with the subscription's secret.
    /// The signature covers the exact bytes of `body`.
    pub async fn post_event(
        &self,
        target_url: &str,
        secret_key: &str,
        event_type: &str,
        event_id: Uuid,
        body: String,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let signature = signing::signature_header(secret_key, body.as_bytes());
        self.http_client
            .post(target_url)
            .header(CONTENT_TYPE, "application/json")
            .header("X-Signature", signature)
            .header("X-Timestamp", signing::unix_timestamp().to_string())
            .header("X-Event-Type", event_type)
            .header("X-Event-Id", event_id.to_string())
            .body(body)
            .send()
            .await
    }
}
