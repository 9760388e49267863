#![allow(clippy::result_large_err)]

//! Target workspace API: the client trait, the HTTP implementation and the
//! dry-run stand-in.

use crate::core::config::TargetConfig;
use crate::core::deploy::log::DeploymentRecord;
use crate::core::error::AppError;
use crate::core::types::{ErrorCategory, ResourceKind};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// ASCII set for encoding path segments (slashes included).
const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS.add(b' ').add(b'/').add(b'?').add(b'#');

const MAX_OPERATION_POLLS: usize = 60;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DeployError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Transport failures and 408/429/5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Operations the deployment orchestrator needs from the target workspace.
#[async_trait]
pub trait WorkspaceClient: Send + Sync {
    async fn create_connection(&self, payload: &Value) -> Result<String, DeployError>;

    /// Create a workspace item (pipeline or variable library). The payload's
    /// `definition` is a map of part path → JSON content.
    async fn create_item(&self, payload: &Value) -> Result<String, DeployError>;

    async fn create_schedule(&self, item_id: &str, payload: &Value) -> Result<String, DeployError>;

    async fn delete(&self, record: &DeploymentRecord) -> Result<(), DeployError>;
}

/// Convert `{"definition": {"path": content}}` into inline base64 parts.
pub fn encode_definition(payload: &Value) -> Result<Value, DeployError> {
    let mut body = payload.clone();
    let Some(parts) = payload.get("definition").and_then(Value::as_object) else {
        return Ok(body);
    };
    let mut encoded = Vec::with_capacity(parts.len());
    for (path, content) in parts {
        let text = match content {
            Value::String(raw) => raw.clone(),
            other => serde_json::to_string_pretty(other)
                .map_err(|err| DeployError::Internal(err.to_string()))?,
        };
        encoded.push(json!({
            "path": path,
            "payload": BASE64.encode(text.as_bytes()),
            "payloadType": "InlineBase64",
        }));
    }
    if let Some(map) = body.as_object_mut() {
        map.insert("definition".to_string(), json!({"parts": encoded}));
    }
    Ok(body)
}

/// Bearer-token HTTP client for the workspace REST API.
#[derive(Clone)]
pub struct FabricClient {
    http: reqwest::Client,
    base_url: String,
    workspace_id: String,
    token: String,
    poll_interval: Duration,
}

impl FabricClient {
    pub fn new(config: &TargetConfig) -> Result<Self, AppError> {
        let workspace_id = config.workspace_id.clone().ok_or_else(|| {
            AppError::new(ErrorCategory::ConfigError, "target.workspace_id is not set")
                .with_code("MIG-CFG-010")
        })?;
        let token = config.access_token.clone().ok_or_else(|| {
            AppError::new(ErrorCategory::ConfigError, "no access token configured")
                .with_code("MIG-CFG-010")
                .with_suggestion("Set FERRY_ACCESS_TOKEN")
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|err| {
                AppError::with_source(
                    ErrorCategory::InternalError,
                    "failed to build HTTP client",
                    Box::new(err),
                )
            })?;
        Ok(Self::with_client(http, &config.api_base_url, workspace_id, token))
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: &str,
        workspace_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            workspace_id: workspace_id.into(),
            token: token.into(),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn connections_url(&self) -> String {
        format!("{}/v1/connections", self.base_url)
    }

    fn items_url(&self) -> String {
        format!(
            "{}/v1/workspaces/{}/items",
            self.base_url,
            encode_segment(&self.workspace_id)
        )
    }

    fn schedules_url(&self, item_id: &str) -> String {
        format!(
            "{}/{}/jobs/Pipeline/schedules",
            self.items_url(),
            encode_segment(item_id)
        )
    }

    async fn post(&self, url: &str, body: &Value) -> Result<String, DeployError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        if response.status() == StatusCode::ACCEPTED {
            if let Some(location) = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
            {
                return self.await_operation(&location).await;
            }
        }
        let value = self.json_body(response).await?;
        extract_id(&value)
    }

    /// Poll a long-running operation until it settles, then read its result.
    async fn await_operation(&self, location: &str) -> Result<String, DeployError> {
        for _ in 0..MAX_OPERATION_POLLS {
            tokio::time::sleep(self.poll_interval).await;
            let response = self.http.get(location).bearer_auth(&self.token).send().await?;
            let state = self.json_body(response).await?;
            match state.get("status").and_then(Value::as_str) {
                Some("Succeeded") => {
                    let url = format!("{}/result", location.trim_end_matches('/'));
                    let response = self.http.get(&url).bearer_auth(&self.token).send().await?;
                    return extract_id(&self.json_body(response).await?);
                }
                Some("Failed") => {
                    let message = state
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("operation failed")
                        .to_string();
                    return Err(DeployError::api(500, message));
                }
                _ => continue,
            }
        }
        Err(DeployError::api(
            408,
            format!("operation at {} did not finish", location),
        ))
    }

    async fn json_body(&self, response: reqwest::Response) -> Result<Value, DeployError> {
        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DeployError::api(status.as_u16(), text));
        }
        response
            .json()
            .await
            .map_err(|err| DeployError::InvalidResponse(format!("failed to parse JSON: {}", err)))
    }

    async fn send_delete(&self, url: &str) -> Result<(), DeployError> {
        let response = self.http.delete(url).bearer_auth(&self.token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(url, "Resource already absent");
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(DeployError::api(status.as_u16(), text))
    }
}

#[async_trait]
impl WorkspaceClient for FabricClient {
    async fn create_connection(&self, payload: &Value) -> Result<String, DeployError> {
        self.post(&self.connections_url(), payload).await
    }

    async fn create_item(&self, payload: &Value) -> Result<String, DeployError> {
        let body = encode_definition(payload)?;
        self.post(&self.items_url(), &body).await
    }

    async fn create_schedule(&self, item_id: &str, payload: &Value) -> Result<String, DeployError> {
        self.post(&self.schedules_url(item_id), payload).await
    }

    async fn delete(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        let url = match record.kind {
            ResourceKind::Connection => format!(
                "{}/{}",
                self.connections_url(),
                encode_segment(&record.target_id)
            ),
            ResourceKind::Pipeline | ResourceKind::VariableLibrary => format!(
                "{}/{}",
                self.items_url(),
                encode_segment(&record.target_id)
            ),
            ResourceKind::Schedule => {
                let parent = record.parent_id.as_deref().ok_or_else(|| {
                    DeployError::Internal(format!(
                        "schedule '{}' has no owning item",
                        record.source_name
                    ))
                })?;
                format!(
                    "{}/{}",
                    self.schedules_url(parent),
                    encode_segment(&record.target_id)
                )
            }
        };
        self.send_delete(&url).await
    }
}

/// Issues no requests; every creation returns a synthetic `dry-run-<uuid>` id.
#[derive(Debug, Default)]
pub struct DryRunClient {
    created: AtomicUsize,
}

impl DryRunClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> String {
        self.created.fetch_add(1, Ordering::SeqCst);
        format!("dry-run-{}", uuid::Uuid::new_v4())
    }
}

#[async_trait]
impl WorkspaceClient for DryRunClient {
    async fn create_connection(&self, _payload: &Value) -> Result<String, DeployError> {
        Ok(self.next_id())
    }

    async fn create_item(&self, payload: &Value) -> Result<String, DeployError> {
        encode_definition(payload)?;
        Ok(self.next_id())
    }

    async fn create_schedule(
        &self,
        _item_id: &str,
        _payload: &Value,
    ) -> Result<String, DeployError> {
        Ok(self.next_id())
    }

    async fn delete(&self, _record: &DeploymentRecord) -> Result<(), DeployError> {
        Ok(())
    }
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT_ENCODE_SET).to_string()
}

fn extract_id(value: &Value) -> Result<String, DeployError> {
    value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DeployError::InvalidResponse("response has no 'id'".to_string()))
}
