use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ferry::core::deploy::{DeploymentRecord, FabricClient, RetryPolicy, WorkspaceClient};
use ferry::core::types::ResourceKind;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> FabricClient {
    FabricClient::with_client(reqwest::Client::new(), &server.uri(), "ws-1", "token-abc")
        .with_poll_interval(Duration::from_millis(1))
}

fn pipeline_payload() -> Value {
    json!({
        "displayName": "LoadA",
        "type": "DataPipeline",
        "definition": {"pipeline-content.json": {"name": "LoadA", "properties": {"activities": []}}}
    })
}

#[tokio::test]
async fn test_create_item_sends_inline_parts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workspaces/ws-1/items"))
        .and(header("authorization", "Bearer token-abc"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "item-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let id = client(&server).create_item(&pipeline_payload()).await.unwrap();
    assert_eq!(id, "item-1");

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["displayName"], "LoadA");
    let part = &body["definition"]["parts"][0];
    assert_eq!(part["path"], "pipeline-content.json");
    let decoded = BASE64.decode(part["payload"].as_str().unwrap()).unwrap();
    let content: Value = serde_json::from_slice(&decoded).unwrap();
    assert_eq!(content["name"], "LoadA");
}

#[tokio::test]
async fn test_accepted_operation_is_polled_to_completion() {
    let server = MockServer::start().await;
    let location = format!("{}/v1/operations/op-7", server.uri());
    Mock::given(method("POST"))
        .and(path("/v1/connections"))
        .respond_with(ResponseTemplate::new(202).insert_header("Location", location.as_str()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/operations/op-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/operations/op-7/result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "conn-42"})))
        .mount(&server)
        .await;

    let id = client(&server)
        .create_connection(&json!({"displayName": "Lake"}))
        .await
        .unwrap();
    assert_eq!(id, "conn-42");
}

#[tokio::test]
async fn test_failed_operation_is_reported() {
    let server = MockServer::start().await;
    let location = format!("{}/v1/operations/op-8", server.uri());
    Mock::given(method("POST"))
        .and(path("/v1/connections"))
        .respond_with(ResponseTemplate::new(202).insert_header("Location", location.as_str()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/operations/op-8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "Failed",
            "error": {"message": "gateway offline"}
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .create_connection(&json!({"displayName": "Lake"}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("gateway offline"));
}

#[tokio::test]
async fn test_conflict_is_not_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workspaces/ws-1/items"))
        .respond_with(ResponseTemplate::new(409).set_body_string("ItemDisplayNameAlreadyInUse"))
        .mount(&server)
        .await;

    let err = client(&server).create_item(&pipeline_payload()).await.unwrap_err();
    assert_eq!(err.status(), Some(409));
    assert!(!err.is_transient());
    assert!(err.to_string().contains("ItemDisplayNameAlreadyInUse"));
}

#[tokio::test]
async fn test_retry_recovers_from_throttling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/connections"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/connections"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "conn-1"})))
        .mount(&server)
        .await;

    let client = client(&server);
    let payload = json!({"displayName": "Lake"});
    let policy = RetryPolicy {
        max_attempts: 3,
        backoff_ms: 1,
        backoff_multiplier: 2.0,
        jitter_ms: 0,
    };
    let id = policy
        .run("create connection", || client.create_connection(&payload))
        .await
        .unwrap();
    assert_eq!(id, "conn-1");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_resource_counts_as_deleted() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/workspaces/ws-1/items/item-1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let record = DeploymentRecord::new(ResourceKind::Pipeline, "LoadA", "item-1");
    client(&server).delete(&record).await.unwrap();
}

#[tokio::test]
async fn test_schedule_delete_targets_owning_item() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/workspaces/ws-1/items/item-1/jobs/Pipeline/schedules/sched-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let record =
        DeploymentRecord::new(ResourceKind::Schedule, "Hourly", "sched-1").with_parent("item-1");
    client(&server).delete(&record).await.unwrap();

    let orphan = DeploymentRecord::new(ResourceKind::Schedule, "Hourly", "sched-2");
    assert!(client(&server).delete(&orphan).await.is_err());
}
