#![allow(clippy::result_large_err)]

//! Dependency-ordered deployment with bounded parallelism and rollback.
//!
//! Phases run in a fixed order: variable library, connections, pipeline
//! waves (invoked pipelines first), then schedules. Each pipeline is
//! transformed when its wave starts so invocations can resolve to the ids
//! of children deployed in earlier waves. A dependency cycle refuses the
//! whole deployment before any request is sent.

use crate::core::config::loader::ConnectionOverrides;
use crate::core::config::{ConnectionsConfig, DeploymentConfig};
use crate::core::deploy::client::{DeployError, WorkspaceClient};
use crate::core::deploy::log::{DeploymentLog, DeploymentRecord, RollbackReport};
use crate::core::deploy::retry::RetryPolicy;
use crate::core::error::AppError;
use crate::core::migration::connectors::{
    plan_connections, ConnectionAction, ConnectionPayloadBuilder, ConnectionPlan,
};
use crate::core::migration::diagnostics::{Diagnostics, MigrationIssue};
use crate::core::migration::graph::DependencyGraph;
use crate::core::migration::pipeline::{
    PipelineState, PipelineTransformation, PipelineTransformer, TransformSettings,
};
use crate::core::migration::resolver::{ConnectionResolver, ResolutionContext, ResolutionStats};
use crate::core::migration::schema::ParsedTemplate;
use crate::core::migration::triggers::{convert_triggers, ScheduleBinding};
use crate::core::migration::variables::build_variable_library;
use crate::core::types::{ErrorCategory, ResourceKind};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Shared flag checked between deployment waves.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentOptions {
    pub concurrency: usize,
    pub dry_run: bool,
    pub rollback_on_failure: bool,
    pub retry: RetryPolicy,
}

impl DeploymentOptions {
    pub fn from_config(config: &DeploymentConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            dry_run: config.dry_run,
            rollback_on_failure: config.rollback_on_failure,
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self::from_config(&DeploymentConfig::default())
    }
}

/// Everything the orchestrator reads from the parsed export and configuration.
pub struct DeploymentInputs<'a> {
    pub template: &'a ParsedTemplate,
    pub settings: TransformSettings,
    pub connections: &'a ConnectionsConfig,
    pub overrides: &'a ConnectionOverrides,
    pub gateway_id: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

#[derive(Debug, Serialize)]
pub struct DeploymentOutcome {
    pub status: DeploymentStatus,
    pub dry_run: bool,
    pub waves: Vec<Vec<String>>,
    pub connections: Vec<ConnectionPlan>,
    pub pipelines: Vec<PipelineTransformation>,
    pub schedules: Vec<ScheduleBinding>,
    pub resolution: ResolutionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackReport>,
    #[serde(skip)]
    pub log: DeploymentLog,
}

impl DeploymentOutcome {
    pub(crate) fn new(dry_run: bool) -> Self {
        Self {
            status: DeploymentStatus::Completed,
            dry_run,
            waves: Vec::new(),
            connections: Vec::new(),
            pipelines: Vec::new(),
            schedules: Vec::new(),
            resolution: ResolutionStats::default(),
            failure: None,
            rollback: None,
            log: DeploymentLog::new(dry_run),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeploymentStatus::Completed
    }
}

struct CreateJob {
    kind: ResourceKind,
    name: String,
    parent_id: Option<String>,
    payload: Value,
}

impl CreateJob {
    fn new(kind: ResourceKind, name: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            name: name.into(),
            parent_id: None,
            payload,
        }
    }
}

async fn create(
    client: &dyn WorkspaceClient,
    kind: ResourceKind,
    parent_id: Option<&str>,
    payload: &Value,
) -> Result<String, DeployError> {
    match kind {
        ResourceKind::Connection => client.create_connection(payload).await,
        ResourceKind::VariableLibrary | ResourceKind::Pipeline => client.create_item(payload).await,
        ResourceKind::Schedule => {
            let parent = parent_id
                .ok_or_else(|| DeployError::Internal("schedule without pipeline id".to_string()))?;
            client.create_schedule(parent, payload).await
        }
    }
}

pub struct DeploymentOrchestrator {
    client: Arc<dyn WorkspaceClient>,
    options: DeploymentOptions,
    cancel: CancelFlag,
}

impl DeploymentOrchestrator {
    pub fn new(client: Arc<dyn WorkspaceClient>, options: DeploymentOptions) -> Self {
        Self {
            client,
            options,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Deploy the template. A dependency cycle is returned as an error before
    /// any request is issued; every later failure yields an outcome whose
    /// status says whether the created resources were rolled back.
    pub async fn deploy(
        &self,
        inputs: DeploymentInputs<'_>,
        diagnostics: &mut Diagnostics,
    ) -> Result<DeploymentOutcome, AppError> {
        let graph = DependencyGraph::build(
            inputs.template,
            inputs.settings.max_nesting_depth,
            diagnostics,
        );
        let waves = match graph.deployment_waves() {
            Ok(waves) => waves,
            Err(issue) => {
                let message = issue.to_string();
                let code = issue.code();
                diagnostics.push(issue, None);
                return Err(AppError::new(ErrorCategory::DependencyError, message)
                    .with_code(code)
                    .with_suggestion("Break the invocation cycle before deploying"));
            }
        };

        let mut outcome = DeploymentOutcome::new(self.options.dry_run);
        outcome.waves = waves.clone();
        tracing::info!(
            run_id = %outcome.log.run_id,
            pipelines = graph.len(),
            waves = waves.len(),
            dry_run = self.options.dry_run,
            "Starting deployment"
        );

        let mut context = ResolutionContext::from_config(inputs.connections);

        // Variable library
        if let Some(payload) = build_variable_library(
            &inputs.settings.library_name,
            inputs.template.shared_parameters(),
            diagnostics,
        ) {
            let job = CreateJob::new(
                ResourceKind::VariableLibrary,
                inputs.settings.library_name.clone(),
                payload,
            );
            if let Err(reason) = self.run_phase(vec![job], &mut outcome, diagnostics).await? {
                return Ok(self.abort(outcome, reason).await);
            }
        }

        // Connections
        let builder = ConnectionPayloadBuilder::new(inputs.overrides, inputs.gateway_id);
        outcome.connections = plan_connections(
            inputs.template,
            &builder,
            &inputs.connections.map,
            diagnostics,
        );
        let jobs: Vec<CreateJob> = outcome
            .connections
            .iter()
            .filter(|plan| plan.action == ConnectionAction::Create)
            .filter_map(|plan| {
                plan.payload.clone().map(|payload| {
                    CreateJob::new(ResourceKind::Connection, plan.name.clone(), payload)
                })
            })
            .collect();
        if let Err(reason) = self.run_phase(jobs, &mut outcome, diagnostics).await? {
            return Ok(self.abort(outcome, reason).await);
        }
        for record in outcome.log.of_kind(ResourceKind::Connection) {
            context.register_connection(&record.source_name, &record.target_id);
        }

        // Pipelines, one wave at a time
        let mut transformer = PipelineTransformer::new(inputs.template, inputs.settings.clone())?;
        let mut resolver = ConnectionResolver::new();
        for (index, wave) in waves.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(wave = index, "Deployment cancelled");
                outcome.resolution = resolver.stats();
                return Ok(self.cancelled(outcome).await);
            }

            let mut jobs = Vec::new();
            for name in wave {
                let transformation =
                    transformer.transform(name, &mut resolver, &context, diagnostics);
                if transformation.state == PipelineState::Transformed {
                    if let Some(payload) = transformation.item_payload() {
                        jobs.push(CreateJob::new(ResourceKind::Pipeline, name.clone(), payload));
                    }
                }
                outcome.pipelines.push(transformation);
            }
            tracing::info!(wave = index, pipelines = jobs.len(), "Deploying pipeline wave");

            let first_new = outcome.log.len();
            let phase = self.run_phase(jobs, &mut outcome, diagnostics).await?;
            for record in &outcome.log.records[first_new..] {
                context.register_pipeline(&record.source_name, &record.target_id);
            }
            if let Err(reason) = phase {
                outcome.resolution = resolver.stats();
                return Ok(self.abort(outcome, reason).await);
            }
        }
        outcome.resolution = resolver.stats();

        // Schedules
        if self.cancel.is_cancelled() {
            return Ok(self.cancelled(outcome).await);
        }
        let bindings = convert_triggers(inputs.template, Utc::now(), diagnostics);
        let mut jobs = Vec::new();
        let mut scheduled = Vec::new();
        for binding in bindings {
            let Some(pipeline_id) = context.deployed_pipelines.get(&binding.pipeline) else {
                tracing::debug!(
                    pipeline = %binding.pipeline,
                    "Skipping schedule for undeployed pipeline"
                );
                continue;
            };
            let mut job = CreateJob::new(
                ResourceKind::Schedule,
                binding.trigger.clone(),
                binding.payload.clone(),
            );
            job.parent_id = Some(pipeline_id.clone());
            jobs.push(job);
            scheduled.push(binding);
        }
        if let Err(reason) = self.run_phase(jobs, &mut outcome, diagnostics).await? {
            return Ok(self.abort(outcome, reason).await);
        }
        outcome.schedules = scheduled;

        tracing::info!(
            run_id = %outcome.log.run_id,
            created = outcome.log.len(),
            "Deployment completed"
        );
        Ok(outcome)
    }

    /// Create every job concurrently under the semaphore. Successful creations
    /// are logged in job order; the first failure is returned as `Err(reason)`
    /// once all in-flight work has finished.
    async fn run_phase(
        &self,
        jobs: Vec<CreateJob>,
        outcome: &mut DeploymentOutcome,
        diagnostics: &mut Diagnostics,
    ) -> Result<Result<(), String>, AppError> {
        if jobs.is_empty() {
            return Ok(Ok(()));
        }
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut join_set: JoinSet<(usize, Result<String, DeployError>)> = JoinSet::new();

        for (index, job) in jobs.iter().enumerate() {
            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                AppError::new(ErrorCategory::InternalError, format!("Semaphore closed: {e}"))
            })?;
            let client = Arc::clone(&self.client);
            let policy = self.options.retry;
            let kind = job.kind;
            let label = format!("create {} '{}'", job.kind, job.name);
            let parent_id = job.parent_id.clone();
            let payload = job.payload.clone();

            join_set.spawn(async move {
                let _permit = permit;
                let client_ref: &dyn WorkspaceClient = client.as_ref();
                let parent_ref = parent_id.as_deref();
                let payload_ref = &payload;
                let result = policy
                    .run(&label, move || create(client_ref, kind, parent_ref, payload_ref))
                    .await;
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<String, DeployError>>> =
            jobs.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(join_err) => {
                    tracing::error!(error = %join_err, "Deployment task did not complete");
                }
            }
        }

        let mut failure = None;
        for (job, result) in jobs.into_iter().zip(results) {
            let result = result.unwrap_or_else(|| {
                Err(DeployError::Internal("deployment task aborted".to_string()))
            });
            match result {
                Ok(target_id) => {
                    tracing::info!(
                        kind = %job.kind,
                        source = %job.name,
                        target_id = %target_id,
                        "Created resource"
                    );
                    let mut record = DeploymentRecord::new(job.kind, job.name, target_id);
                    record.parent_id = job.parent_id;
                    outcome.log.append(record);
                }
                Err(err) => {
                    let reason = err.to_string();
                    diagnostics.at(
                        job.name.clone(),
                        MigrationIssue::DeploymentFailed {
                            resource: job.kind.to_string(),
                            name: job.name.clone(),
                            reason: reason.clone(),
                        },
                    );
                    failure.get_or_insert(format!("{} '{}': {}", job.kind, job.name, reason));
                }
            }
        }
        Ok(match failure {
            Some(reason) => Err(reason),
            None => Ok(()),
        })
    }

    async fn abort(&self, mut outcome: DeploymentOutcome, reason: String) -> DeploymentOutcome {
        tracing::error!(run_id = %outcome.log.run_id, reason = %reason, "Deployment failed");
        outcome.failure = Some(reason);
        outcome.status = DeploymentStatus::Failed;
        self.maybe_rollback(&mut outcome).await;
        outcome
    }

    async fn cancelled(&self, mut outcome: DeploymentOutcome) -> DeploymentOutcome {
        outcome.failure = Some("cancelled".to_string());
        outcome.status = DeploymentStatus::Cancelled;
        self.maybe_rollback(&mut outcome).await;
        outcome
    }

    async fn maybe_rollback(&self, outcome: &mut DeploymentOutcome) {
        if !self.options.rollback_on_failure || outcome.log.is_empty() {
            return;
        }
        tracing::warn!(resources = outcome.log.len(), "Rolling back created resources");
        let report = outcome.log.rollback(self.client.as_ref()).await;
        if !report.is_clean() {
            tracing::error!(failed = report.failed.len(), "Rollback left resources behind");
        }
        outcome.rollback = Some(report);
        outcome.status = DeploymentStatus::RolledBack;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn options_clamp_concurrency() {
        let config = DeploymentConfig {
            concurrency: 0,
            ..DeploymentConfig::default()
        };
        assert_eq!(DeploymentOptions::from_config(&config).concurrency, 1);
    }
}
