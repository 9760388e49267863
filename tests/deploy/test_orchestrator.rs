#[path = "../common/mod.rs"]
mod common;

use async_trait::async_trait;
use ferry::core::config::{ConnectionsConfig, MigrationConfig};
use ferry::core::deploy::{
    CancelFlag, DeployError, DeploymentInputs, DeploymentOptions, DeploymentOrchestrator,
    DeploymentOutcome, DeploymentRecord, DeploymentStatus, RetryPolicy, WorkspaceClient,
};
use ferry::core::error::AppError;
use ferry::core::migration::{Diagnostics, ParsedTemplate, TransformSettings};
use ferry::core::types::{ErrorCategory, ResourceKind};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Connection { id: String, payload: Value },
    Item { id: Option<String>, payload: Value },
    Schedule { id: String, parent: String },
    Delete { id: String },
}

/// In-memory workspace that records every request it receives.
#[derive(Default)]
struct RecordingClient {
    calls: Mutex<Vec<Call>>,
    next: AtomicUsize,
    fail_on: Option<String>,
    flaky: Mutex<HashSet<String>>,
}

impl RecordingClient {
    fn failing_on(name: &str) -> Self {
        Self {
            fail_on: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn flaky_once(name: &str) -> Self {
        let client = Self::default();
        client.flaky.lock().unwrap().insert(name.to_string());
        client
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn issue_id(&self) -> String {
        format!("id-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn item_id(&self, display_name: &str) -> Option<String> {
        self.calls().into_iter().find_map(|call| match call {
            Call::Item {
                id: Some(id),
                payload,
            } if payload["displayName"] == display_name => Some(id),
            _ => None,
        })
    }

    fn item_payload(&self, display_name: &str) -> Option<Value> {
        self.calls().into_iter().find_map(|call| match call {
            Call::Item {
                id: Some(_),
                payload,
            } if payload["displayName"] == display_name => Some(payload),
            _ => None,
        })
    }

    fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete { id } => Some(id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl WorkspaceClient for RecordingClient {
    async fn create_connection(&self, payload: &Value) -> Result<String, DeployError> {
        let id = self.issue_id();
        self.calls.lock().unwrap().push(Call::Connection {
            id: id.clone(),
            payload: payload.clone(),
        });
        Ok(id)
    }

    async fn create_item(&self, payload: &Value) -> Result<String, DeployError> {
        let name = payload["displayName"].as_str().unwrap_or_default().to_string();
        if self.flaky.lock().unwrap().remove(&name) {
            self.calls.lock().unwrap().push(Call::Item {
                id: None,
                payload: payload.clone(),
            });
            return Err(DeployError::api(503, "busy"));
        }
        if self.fail_on.as_deref() == Some(name.as_str()) {
            self.calls.lock().unwrap().push(Call::Item {
                id: None,
                payload: payload.clone(),
            });
            return Err(DeployError::api(400, "definition rejected"));
        }
        let id = self.issue_id();
        self.calls.lock().unwrap().push(Call::Item {
            id: Some(id.clone()),
            payload: payload.clone(),
        });
        Ok(id)
    }

    async fn create_schedule(
        &self,
        item_id: &str,
        _payload: &Value,
    ) -> Result<String, DeployError> {
        let id = self.issue_id();
        self.calls.lock().unwrap().push(Call::Schedule {
            id: id.clone(),
            parent: item_id.to_string(),
        });
        Ok(id)
    }

    async fn delete(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        self.calls.lock().unwrap().push(Call::Delete {
            id: record.target_id.clone(),
        });
        Ok(())
    }
}

fn options(rollback_on_failure: bool) -> DeploymentOptions {
    DeploymentOptions {
        concurrency: 3,
        dry_run: false,
        rollback_on_failure,
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_ms: 1,
            backoff_multiplier: 2.0,
            jitter_ms: 0,
        },
    }
}

async fn deploy_with(
    template: &ParsedTemplate,
    client: Arc<RecordingClient>,
    options: DeploymentOptions,
    cancel: CancelFlag,
) -> (Result<DeploymentOutcome, AppError>, Diagnostics) {
    let config = MigrationConfig::default();
    let connections = ConnectionsConfig::default();
    let overrides = Map::new();
    let inputs = DeploymentInputs {
        template,
        settings: TransformSettings::from_config(&config),
        connections: &connections,
        overrides: &overrides,
        gateway_id: None,
    };
    let mut diagnostics = Diagnostics::new();
    let orchestrator = DeploymentOrchestrator::new(client, options).with_cancel_flag(cancel);
    let result = orchestrator.deploy(inputs, &mut diagnostics).await;
    (result, diagnostics)
}

#[tokio::test]
async fn test_full_deployment_wires_created_ids() {
    let template = common::fixture_template();
    let client = Arc::new(RecordingClient::default());
    let (result, _) =
        deploy_with(&template, client.clone(), options(true), CancelFlag::new()).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.status, DeploymentStatus::Completed);
    // library, two connections, five pipelines, one schedule
    assert_eq!(outcome.log.len(), 9);
    assert!(client.deletes().is_empty());

    let load_a = client.item_id("LoadA").unwrap();
    let master = client.item_payload("Master").unwrap();
    let invoke = &master["definition"]["pipeline-content.json"]["properties"]["activities"][0];
    assert_eq!(invoke["typeProperties"]["pipelineId"], json!(load_a));

    let master_id = client.item_id("Master").unwrap();
    let schedule_parents: Vec<String> = client
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Schedule { parent, .. } => Some(parent),
            _ => None,
        })
        .collect();
    assert_eq!(schedule_parents, vec![master_id]);

    let connection_ids: Vec<&str> = outcome
        .log
        .of_kind(ResourceKind::Connection)
        .map(|record| record.source_name.as_str())
        .collect();
    assert_eq!(connection_ids, vec!["Lake", "SalesDb"]);
}

#[tokio::test]
async fn test_children_are_created_before_parents() {
    let template = common::fixture_template();
    let client = Arc::new(RecordingClient::default());
    let (result, _) =
        deploy_with(&template, client.clone(), options(true), CancelFlag::new()).await;
    result.unwrap();

    let order: Vec<String> = client
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Item { payload, .. } if payload["type"] == "DataPipeline" => {
                payload["displayName"].as_str().map(str::to_string)
            }
            _ => None,
        })
        .collect();
    let position = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(position("Common") < position("LoadA"));
    assert!(position("Common") < position("LoadB"));
    assert!(position("LoadA") < position("Master"));
    assert!(position("LoadB") < position("Master"));
}

#[tokio::test]
async fn test_failure_rolls_back_in_reverse_order() {
    let template = common::fixture_template();
    let client = Arc::new(RecordingClient::failing_on("Master"));
    let (result, diagnostics) =
        deploy_with(&template, client.clone(), options(true), CancelFlag::new()).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.status, DeploymentStatus::RolledBack);
    assert!(outcome.failure.as_deref().unwrap().contains("Master"));
    assert!(diagnostics.has_code("MIG-DEPLOY-001"));

    let expected: Vec<String> = outcome
        .log
        .records
        .iter()
        .rev()
        .map(|record| record.target_id.clone())
        .collect();
    assert_eq!(expected.len(), 7);
    assert_eq!(client.deletes(), expected);

    let rollback = outcome.rollback.unwrap();
    assert!(rollback.is_clean());
    assert_eq!(rollback.deleted.len(), 7);
}

#[tokio::test]
async fn test_failure_without_rollback_keeps_resources() {
    let template = common::fixture_template();
    let client = Arc::new(RecordingClient::failing_on("Master"));
    let (result, _) =
        deploy_with(&template, client.clone(), options(false), CancelFlag::new()).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.status, DeploymentStatus::Failed);
    assert!(outcome.rollback.is_none());
    assert!(client.deletes().is_empty());
    assert_eq!(outcome.log.len(), 7);
}

#[tokio::test]
async fn test_cycle_is_rejected_before_any_request() {
    let template = common::template_from(json!({
        "resources": [
            {
                "type": "Microsoft.DataFactory/factories/pipelines",
                "name": "f/Ping",
                "properties": {"activities": [{
                    "name": "Call", "type": "ExecutePipeline",
                    "typeProperties": {"pipeline": {"referenceName": "Pong", "type": "PipelineReference"}}
                }]}
            },
            {
                "type": "Microsoft.DataFactory/factories/pipelines",
                "name": "f/Pong",
                "properties": {"activities": [{
                    "name": "Call", "type": "ExecutePipeline",
                    "typeProperties": {"pipeline": {"referenceName": "Ping", "type": "PipelineReference"}}
                }]}
            }
        ]
    }));
    let client = Arc::new(RecordingClient::default());
    let (result, diagnostics) =
        deploy_with(&template, client.clone(), options(true), CancelFlag::new()).await;

    let err = result.unwrap_err();
    assert_eq!(err.category, ErrorCategory::DependencyError);
    assert_eq!(err.code, "MIG-DEP-001");
    assert!(diagnostics.has_code("MIG-DEP-001"));
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_before_pipelines() {
    let template = common::fixture_template();
    let client = Arc::new(RecordingClient::default());
    let cancel = CancelFlag::new();
    cancel.cancel();
    let (result, _) = deploy_with(&template, client.clone(), options(true), cancel).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.status, DeploymentStatus::RolledBack);
    assert_eq!(outcome.failure.as_deref(), Some("cancelled"));
    assert!(outcome.pipelines.is_empty());
    assert_eq!(client.deletes().len(), 3);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let template = common::fixture_template();
    let client = Arc::new(RecordingClient::flaky_once("LoadA"));
    let (result, _) =
        deploy_with(&template, client.clone(), options(true), CancelFlag::new()).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.status, DeploymentStatus::Completed);
    let attempts = client
        .calls()
        .into_iter()
        .filter(|call| {
            matches!(call, Call::Item { payload, .. } if payload["displayName"] == "LoadA")
        })
        .count();
    assert_eq!(attempts, 2);
}
