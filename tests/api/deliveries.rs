use wiremock::matchers::any;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;
use crate::helpers::spawn_app_with;
use crate::helpers::TestApp;

async fn accepted_event_id(app: &TestApp, key: &str, event_type: &str) -> String {
    let response = app
        .post_event(
            key,
            &serde_json::json!({"eventType": event_type, "payload": {"x": 1}}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 202);
    let body: serde_json::Value = response.json().await.unwrap();
    body["eventId"].as_str().unwrap().to_string()
}

async fn delivery_logs_of(app: &TestApp, event_id: &str) -> Vec<serde_json::Value> {
    let body: serde_json::Value = app.get_event(event_id).await.json().await.unwrap();
    body["deliveryLogs"].as_array().unwrap().clone()
}

#[tokio::test]
async fn happy_path_delivers_once_and_logs_success() {
    let app = spawn_app().await;
    app.create_subscription("user.created", "/hooks/ok").await;

    Mock::given(path("/hooks/ok"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("received"))
        .expect(1)
        .mount(&app.sink)
        .await;

    let event_id = accepted_event_id(&app, "k1", "user.created").await;
    app.dispatch_all_jobs().await;

    let logs = delivery_logs_of(&app, &event_id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["status"], "success");
    assert_eq!(logs[0]["attemptCount"], 1);
    assert_eq!(logs[0]["responseStatusCode"], 200);
    assert_eq!(logs[0]["responseBody"], "received");
    assert_eq!(logs[0]["errorMessage"], serde_json::Value::Null);

    let stats = app.get_stats().await;
    assert_eq!(stats["deliveries"]["successRate"], 100.0);

    // nothing left queued
    assert_eq!(app.count_rows("fanout_queue").await, 0);
    assert_eq!(app.count_rows("delivery_queue").await, 0);
}

#[tokio::test]
async fn the_outbound_request_is_signed_and_annotated() {
    let app = spawn_app().await;
    let (_, secret) = app.create_subscription("user.created", "/hooks/ok").await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.sink)
        .await;

    let event_id = accepted_event_id(&app, "k1", "user.created").await;
    app.dispatch_all_jobs().await;

    let request = app
        .sink
        .received_requests()
        .await
        .unwrap()
        .pop()
        .unwrap();

    // headers
    let header = |name: &str| request.headers.get(name).unwrap().to_str().unwrap().to_string();
    assert_eq!(header("Content-Type"), "application/json");
    assert_eq!(header("X-Event-Type"), "user.created");
    assert_eq!(header("X-Event-Id"), event_id);
    assert_eq!(header("User-Agent"), "webhook-relay/1.0");
    let timestamp: i64 = header("X-Timestamp").parse().unwrap();
    assert!((chrono::Utc::now().timestamp() - timestamp).abs() < 300);

    // the signature covers the exact bytes that were posted
    assert!(webhook_relay::signing::verify_signature(
        &secret,
        &request.body,
        &header("X-Signature"),
    ));

    // canonical envelope
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["id"].as_str().unwrap(), event_id);
    assert_eq!(body["eventType"], "user.created");
    assert_eq!(body["payload"], serde_json::json!({"x": 1}));
    assert_eq!(body["idempotencyKey"], "k1");
    assert!(body["receivedAt"].as_str().is_some());
}

#[tokio::test]
async fn failing_endpoint_is_retried_to_exhaustion() {
    let app = spawn_app().await;
    app.create_subscription("user.created", "/hooks/down").await;

    Mock::given(path("/hooks/down"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&app.sink)
        .await;

    let event_id = accepted_event_id(&app, "k1", "user.created").await;
    app.dispatch_all_jobs().await;

    let logs = delivery_logs_of(&app, &event_id).await;
    assert_eq!(logs.len(), 3);
    let mut attempts: Vec<i64> = logs
        .iter()
        .map(|log| log["attemptCount"].as_i64().unwrap())
        .collect();
    attempts.sort_unstable();
    assert_eq!(attempts, vec![1, 2, 3]);
    for log in &logs {
        assert_eq!(log["status"], "failed");
        assert_eq!(log["responseStatusCode"], 500);
        assert_eq!(log["responseBody"], "boom");
        assert_eq!(log["errorMessage"], "HTTP 500");
    }

    // permanently failed: the job is gone and no fourth attempt can happen
    assert_eq!(app.count_rows("delivery_queue").await, 0);
}

#[tokio::test]
async fn a_single_attempt_budget_means_a_single_failure() {
    let app = spawn_app_with(|c| c.delivery.max_retry_attempts = 1).await;
    app.create_subscription("user.created", "/hooks/down").await;

    Mock::given(path("/hooks/down"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&app.sink)
        .await;

    let event_id = accepted_event_id(&app, "k1", "user.created").await;
    app.dispatch_all_jobs().await;

    let logs = delivery_logs_of(&app, &event_id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["status"], "failed");
    assert_eq!(app.count_rows("delivery_queue").await, 0);
}

#[tokio::test]
async fn transport_errors_are_logged_without_a_status_code() {
    let app = spawn_app_with(|c| c.delivery.max_retry_attempts = 1).await;

    // nothing listens on port 1; the connection is refused
    let response = app
        .post_subscription(&serde_json::json!({
            "eventType": "user.created",
            "targetUrl": "http://127.0.0.1:1/hooks",
        }))
        .await;
    assert_eq!(response.status().as_u16(), 201);

    let event_id = accepted_event_id(&app, "k1", "user.created").await;
    app.dispatch_all_jobs().await;

    let logs = delivery_logs_of(&app, &event_id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["status"], "failed");
    assert_eq!(logs[0]["responseStatusCode"], serde_json::Value::Null);
    assert_eq!(logs[0]["responseBody"], serde_json::Value::Null);
    assert!(!logs[0]["errorMessage"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn fanout_reaches_every_active_subscriber() {
    let app = spawn_app().await;
    let (first, _) = app.create_subscription("order.paid", "/hooks/a").await;
    let (second, _) = app.create_subscription("order.paid", "/hooks/b").await;

    Mock::given(path("/hooks/a"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.sink)
        .await;
    Mock::given(path("/hooks/b"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&app.sink)
        .await;

    let event_id = accepted_event_id(&app, "k1", "order.paid").await;
    app.dispatch_all_jobs().await;

    let logs = delivery_logs_of(&app, &event_id).await;
    let of = |id: uuid::Uuid| {
        logs.iter()
            .filter(|log| log["subscriptionId"].as_str().unwrap() == id.to_string())
            .count()
    };
    assert_eq!(of(first), 1);
    assert_eq!(of(second), 3);
}

#[tokio::test]
async fn subscribers_of_other_event_types_see_nothing() {
    let app = spawn_app().await;
    app.create_subscription("order.paid", "/hooks/paid").await;
    app.create_subscription("order.refunded", "/hooks/refunded").await;

    Mock::given(path("/hooks/paid"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.sink)
        .await;
    Mock::given(path("/hooks/refunded"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.sink)
        .await;

    accepted_event_id(&app, "k1", "order.paid").await;
    app.dispatch_all_jobs().await;
}

#[tokio::test]
async fn inactive_subscriptions_are_dropped_without_a_log() {
    let app = spawn_app().await;
    let (id, _) = app.create_subscription("user.created", "/hooks/gone").await;
    app.deactivate_subscription(id).await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.sink)
        .await;

    let event_id = accepted_event_id(&app, "k1", "user.created").await;
    app.dispatch_all_jobs().await;

    assert_eq!(delivery_logs_of(&app, &event_id).await.len(), 0);
    assert_eq!(app.count_rows("delivery_logs").await, 0);
}

#[tokio::test]
async fn a_subscription_deleted_while_queued_is_dropped() {
    let app = spawn_app().await;
    let (id, _) = app.create_subscription("user.created", "/hooks/gone").await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.sink)
        .await;

    let event_id = accepted_event_id(&app, "k1", "user.created").await;
    // the event is accepted and fan-out queued, but the subscriber leaves
    // before any worker runs
    let response = app.delete_subscription(id).await;
    assert_eq!(response.status().as_u16(), 200);

    app.dispatch_all_jobs().await;

    assert_eq!(delivery_logs_of(&app, &event_id).await.len(), 0);
    assert_eq!(app.count_rows("delivery_queue").await, 0);
}

#[tokio::test]
async fn an_event_without_subscribers_completes_quietly() {
    let app = spawn_app().await;

    let event_id = accepted_event_id(&app, "k1", "user.created").await;
    app.dispatch_all_jobs().await;

    assert_eq!(delivery_logs_of(&app, &event_id).await.len(), 0);
    assert_eq!(app.count_rows("fanout_queue").await, 0);
    assert_eq!(app.count_rows("delivery_queue").await, 0);
}
