use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;
use crate::helpers::TestApp;

/// One subscription answering 200 on `/hooks/ok` plus one answering 500 on
/// `/hooks/down`, with one delivered event each.
async fn seed_mixed_outcomes(app: &TestApp) -> (String, String) {
    app.create_subscription("user.created", "/hooks/ok").await;
    app.create_subscription("order.paid", "/hooks/down").await;

    Mock::given(path("/hooks/ok"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.sink)
        .await;
    Mock::given(path("/hooks/down"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.sink)
        .await;

    let ok_event = app
        .post_event(
            "k-ok",
            &serde_json::json!({"eventType": "user.created", "payload": {}}),
        )
        .await;
    let down_event = app
        .post_event(
            "k-down",
            &serde_json::json!({"eventType": "order.paid", "payload": {}}),
        )
        .await;
    let ok_event: serde_json::Value = ok_event.json().await.unwrap();
    let down_event: serde_json::Value = down_event.json().await.unwrap();

    app.dispatch_all_jobs().await;

    (
        ok_event["eventId"].as_str().unwrap().to_string(),
        down_event["eventId"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn delivery_logs_filter_by_status() {
    let app = spawn_app().await;
    seed_mixed_outcomes(&app).await;

    let all: serde_json::Value = app.list_delivery_logs(&[]).await.json().await.unwrap();
    // 1 success + 3 exhausted failures
    assert_eq!(all["total"], 4);

    let failed: serde_json::Value = app
        .list_delivery_logs(&[("status", "failed")])
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(failed["total"], 3);
    for log in failed["data"].as_array().unwrap() {
        assert_eq!(log["status"], "failed");
    }

    let succeeded: serde_json::Value = app
        .list_delivery_logs(&[("status", "success")])
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(succeeded["total"], 1);
}

#[tokio::test]
async fn delivery_logs_filter_by_event_and_type_and_window() {
    let app = spawn_app().await;
    let (ok_event, _) = seed_mixed_outcomes(&app).await;

    let by_event: serde_json::Value = app
        .list_delivery_logs(&[("eventId", ok_event.as_str())])
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(by_event["total"], 1);
    assert_eq!(by_event["data"][0]["eventId"], ok_event.as_str());

    let by_type: serde_json::Value = app
        .list_delivery_logs(&[("eventType", "order.paid")])
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(by_type["total"], 3);

    // a window that starts in the future matches nothing
    let empty: serde_json::Value = app
        .list_delivery_logs(&[("startDate", "2099-01-01T00:00:00Z")])
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(empty["total"], 0);

    let until_now: serde_json::Value = app
        .list_delivery_logs(&[("endDate", "2099-01-01T00:00:00Z")])
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(until_now["total"], 4);
}

#[tokio::test]
async fn delivery_logs_reject_an_unknown_status() {
    let app = spawn_app().await;

    let response = app.list_delivery_logs(&[("status", "exploded")]).await;

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn delivery_logs_paginate() {
    let app = spawn_app().await;
    seed_mixed_outcomes(&app).await;

    let paged: serde_json::Value = app
        .list_delivery_logs(&[("page", "2"), ("limit", "3")])
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(paged["total"], 4);
    assert_eq!(paged["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn retrying_a_successful_delivery_is_rejected() {
    let app = spawn_app().await;
    let (ok_event, _) = seed_mixed_outcomes(&app).await;

    let log: serde_json::Value = app.get_event(&ok_event).await.json().await.unwrap();
    let log_id = log["deliveryLogs"][0]["id"].as_str().unwrap().to_string();

    let response = app.retry_delivery(&log_id).await;

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "INVALID_RETRY");
}

#[tokio::test]
async fn retrying_against_an_inactive_subscription_is_rejected() {
    let app = spawn_app().await;
    let (_, down_event) = seed_mixed_outcomes(&app).await;

    let detail: serde_json::Value = app.get_event(&down_event).await.json().await.unwrap();
    let log = &detail["deliveryLogs"][0];
    let log_id = log["id"].as_str().unwrap().to_string();
    let subscription_id: uuid::Uuid =
        log["subscriptionId"].as_str().unwrap().parse().unwrap();

    app.deactivate_subscription(subscription_id).await;

    let response = app.retry_delivery(&log_id).await;

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "INACTIVE_SUBSCRIPTION");
}

#[tokio::test]
async fn retrying_an_unknown_log_returns_404() {
    let app = spawn_app().await;

    let response = app
        .retry_delivery(&uuid::Uuid::new_v4().to_string())
        .await;

    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "LOG_NOT_FOUND");
}

#[tokio::test]
async fn a_manual_retry_starts_a_fresh_attempt_trail() {
    let app = spawn_app().await;
    let (_, down_event) = seed_mixed_outcomes(&app).await;

    let detail: serde_json::Value = app.get_event(&down_event).await.json().await.unwrap();
    assert_eq!(detail["deliveryLogs"].as_array().unwrap().len(), 3);
    let log_id = detail["deliveryLogs"][0]["id"].as_str().unwrap().to_string();

    // the endpoint recovers
    app.sink.reset().await;
    Mock::given(path("/hooks/down"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.sink)
        .await;

    let response = app.retry_delivery(&log_id).await;
    assert_eq!(response.status().as_u16(), 200);

    app.dispatch_all_jobs().await;

    let detail: serde_json::Value = app.get_event(&down_event).await.json().await.unwrap();
    let logs = detail["deliveryLogs"].as_array().unwrap();
    assert_eq!(logs.len(), 4);

    // newest first: the fresh trail starts over at attempt 1 and succeeded
    assert_eq!(logs[0]["attemptCount"], 1);
    assert_eq!(logs[0]["status"], "success");

    // the original three rows are untouched
    let failed = logs
        .iter()
        .filter(|log| log["status"] == "failed")
        .count();
    assert_eq!(failed, 3);
}

#[tokio::test]
async fn stats_start_at_zero() {
    let app = spawn_app().await;

    let stats = app.get_stats().await;

    assert_eq!(stats["events"]["total"], 0);
    assert_eq!(stats["subscriptions"]["total"], 0);
    assert_eq!(stats["deliveries"]["total"], 0);
    assert_eq!(stats["deliveries"]["successRate"], 0.0);
}

#[tokio::test]
async fn stats_aggregate_the_pipeline() {
    let app = spawn_app().await;
    seed_mixed_outcomes(&app).await;

    let (inactive, _) = app.create_subscription("user.deleted", "/hooks/x").await;
    app.deactivate_subscription(inactive).await;

    let stats = app.get_stats().await;

    assert_eq!(stats["events"]["total"], 2);
    assert_eq!(stats["subscriptions"]["total"], 3);
    assert_eq!(stats["subscriptions"]["active"], 2);
    assert_eq!(stats["subscriptions"]["inactive"], 1);
    assert_eq!(stats["deliveries"]["total"], 4);
    assert_eq!(stats["deliveries"]["success"], 1);
    assert_eq!(stats["deliveries"]["failed"], 3);
    assert_eq!(stats["deliveries"]["pending"], 0);
    assert_eq!(stats["deliveries"]["successRate"], 25.0);
}
