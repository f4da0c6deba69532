use crate::helpers::spawn_app;

#[tokio::test]
async fn health_check_reports_ok_and_uptime() {
    let app = spawn_app().await;

    let response = app
        .api_client
        .get(format!("{}/health", app.addr))
        .send()
        .await
        .expect("failed to execute request");

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "OK");
    assert!(body["uptime"].is_u64());
}
