#![allow(clippy::result_large_err)]

//! One migration run over one export file: load, analyze or deploy, and
//! assemble the profile.

use crate::core::config::loader::{ConfigLoader, ConnectionOverrides};
use crate::core::config::MigrationConfig;
use crate::core::deploy::client::{DryRunClient, WorkspaceClient};
use crate::core::deploy::orchestrator::{
    CancelFlag, DeploymentInputs, DeploymentOptions, DeploymentOrchestrator, DeploymentOutcome,
    DeploymentStatus,
};
use crate::core::deploy::retry::RetryPolicy;
use crate::core::error::AppError;
use crate::core::migration::connectors::{plan_connections, ConnectionPayloadBuilder};
use crate::core::migration::diagnostics::Diagnostics;
use crate::core::migration::graph::DependencyGraph;
use crate::core::migration::parser::parse_template_str;
use crate::core::migration::pipeline::{PipelineTransformer, TransformSettings};
use crate::core::migration::report::{
    source_digest, DependencyProfile, MigrationProfile, SourceProfile,
};
use crate::core::migration::resolver::{ConnectionResolver, ResolutionContext};
use crate::core::migration::schema::ParsedTemplate;
use crate::core::migration::triggers::convert_triggers;
use crate::core::types::ErrorCategory;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of analyzing or deploying one export.
#[derive(Debug)]
pub struct MigrationReport {
    pub profile: MigrationProfile,
    pub outcome: DeploymentOutcome,
    pub diagnostics: Diagnostics,
    /// Where the creation log was written, for real deployments.
    pub log_path: Option<PathBuf>,
}

impl MigrationReport {
    pub fn dependency_dot(&self) -> &str {
        &self.profile.dependencies.dot
    }
}

pub struct MigrationRun {
    config: MigrationConfig,
    base_dir: PathBuf,
    source: SourceProfile,
    template: ParsedTemplate,
    parse_diagnostics: Diagnostics,
    overrides: ConnectionOverrides,
}

impl MigrationRun {
    /// Read and parse the export, and load the connection override file.
    /// Relative paths in the config resolve against `base_dir`.
    pub fn load(
        template_path: &Path,
        config: MigrationConfig,
        base_dir: &Path,
    ) -> Result<Self, AppError> {
        let bytes = std::fs::read(template_path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read template {}: {}", template_path.display(), e),
            )
            .with_code("MIG-PARSE-000")
        })?;
        let content = std::str::from_utf8(&bytes).map_err(|e| {
            AppError::new(
                ErrorCategory::ParseError,
                format!("Template {} is not UTF-8: {}", template_path.display(), e),
            )
            .with_code("MIG-PARSE-001")
        })?;
        let parsed = parse_template_str(content)?;
        let overrides = ConfigLoader::load_connection_overrides(&config, base_dir)?;

        tracing::info!(
            template = %template_path.display(),
            components = parsed.template.components().len(),
            diagnostics = parsed.diagnostics.len(),
            "Loaded export template"
        );

        Ok(Self {
            config,
            base_dir: base_dir.to_path_buf(),
            source: SourceProfile {
                path: template_path.to_path_buf(),
                sha256: source_digest(&bytes),
            },
            template: parsed.template,
            parse_diagnostics: parsed.diagnostics,
            overrides,
        })
    }

    pub fn template(&self) -> &ParsedTemplate {
        &self.template
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn overrides(&self) -> &ConnectionOverrides {
        &self.overrides
    }

    /// Transform everything against a dry-run client. Nothing is sent to the
    /// target and no log is written.
    pub async fn analyze(&self) -> Result<MigrationReport, AppError> {
        let options = DeploymentOptions {
            concurrency: self.config.deployment.concurrency.max(1),
            dry_run: true,
            rollback_on_failure: false,
            retry: RetryPolicy::none(),
        };
        self.execute(Arc::new(DryRunClient::new()), options, CancelFlag::new())
            .await
    }

    /// Deploy to the target. The creation log of a real deployment is saved
    /// under `deployment.log_dir` whatever the final status.
    pub async fn deploy(
        &self,
        client: Arc<dyn WorkspaceClient>,
        options: DeploymentOptions,
        cancel: CancelFlag,
    ) -> Result<MigrationReport, AppError> {
        let mut report = self.execute(client, options, cancel).await?;
        if !report.outcome.dry_run && !report.outcome.log.is_empty() {
            let dir = if self.config.deployment.log_dir.is_absolute() {
                self.config.deployment.log_dir.clone()
            } else {
                self.base_dir.join(&self.config.deployment.log_dir)
            };
            let path = report.outcome.log.default_path(&dir);
            report.outcome.log.save(&path)?;
            tracing::info!(path = %path.display(), "Wrote deployment log");
            report.log_path = Some(path);
        }
        Ok(report)
    }

    async fn execute(
        &self,
        client: Arc<dyn WorkspaceClient>,
        options: DeploymentOptions,
        cancel: CancelFlag,
    ) -> Result<MigrationReport, AppError> {
        let mut diagnostics = self.parse_diagnostics.clone();
        let settings = TransformSettings::from_config(&self.config);
        let dry_run = options.dry_run;

        let mut scratch = Diagnostics::new();
        let graph =
            DependencyGraph::build(&self.template, settings.max_nesting_depth, &mut scratch);
        let dependencies = DependencyProfile::from_graph(&graph);

        let orchestrator = DeploymentOrchestrator::new(client, options).with_cancel_flag(cancel);
        let inputs = DeploymentInputs {
            template: &self.template,
            settings: settings.clone(),
            connections: &self.config.connections,
            overrides: &self.overrides,
            gateway_id: self.config.target.gateway_id.as_deref(),
        };
        let outcome = match orchestrator.deploy(inputs, &mut diagnostics).await {
            Ok(outcome) => outcome,
            Err(err) if err.category == ErrorCategory::DependencyError => {
                tracing::warn!(error = %err.message, "Dependency cycle, nothing deployed");
                self.unordered_outcome(settings, dry_run, err.message, &mut diagnostics)?
            }
            Err(err) => return Err(err),
        };

        let profile = MigrationProfile::assemble(
            &self.template,
            self.source.clone(),
            dependencies,
            &outcome,
            &diagnostics,
        );
        Ok(MigrationReport {
            profile,
            outcome,
            diagnostics,
            log_path: None,
        })
    }

    /// Transform every pipeline in name order when no wave order exists, so
    /// the profile still reports what each pipeline would become.
    fn unordered_outcome(
        &self,
        settings: TransformSettings,
        dry_run: bool,
        failure: String,
        diagnostics: &mut Diagnostics,
    ) -> Result<DeploymentOutcome, AppError> {
        let mut outcome = DeploymentOutcome::new(dry_run);
        outcome.status = DeploymentStatus::Failed;
        outcome.failure = Some(failure);

        let gateway = self.config.target.gateway_id.as_deref();
        let builder = ConnectionPayloadBuilder::new(&self.overrides, gateway);
        outcome.connections = plan_connections(
            &self.template,
            &builder,
            &self.config.connections.map,
            diagnostics,
        );

        let context = ResolutionContext::from_config(&self.config.connections);
        let mut transformer = PipelineTransformer::new(&self.template, settings)?;
        let mut resolver = ConnectionResolver::new();
        for name in self.template.pipeline_names() {
            let transformation = transformer.transform(&name, &mut resolver, &context, diagnostics);
            outcome.pipelines.push(transformation);
        }
        outcome.resolution = resolver.stats();
        outcome.schedules = convert_triggers(&self.template, Utc::now(), diagnostics);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ReferenceMapping;
    use std::io::Write;

    const CYCLIC: &str = r#"{
      "resources": [
        {
          "name": "[concat(parameters('factoryName'), '/A')]",
          "type": "Microsoft.DataFactory/factories/pipelines",
          "properties": {"activities": [
            {"name": "CallB", "type": "ExecutePipeline",
             "typeProperties": {"pipeline": {"referenceName": "B", "type": "PipelineReference"}}},
            {"name": "RunSql", "type": "Script",
             "linkedServiceName": {"referenceName": "Db", "type": "LinkedServiceReference"},
             "typeProperties": {"scripts": [{"type": "Query", "text": "select 1"}]}}
          ]}
        },
        {
          "name": "[concat(parameters('factoryName'), '/B')]",
          "type": "Microsoft.DataFactory/factories/pipelines",
          "properties": {"activities": [
            {"name": "CallA", "type": "ExecutePipeline",
             "typeProperties": {"pipeline": {"referenceName": "A", "type": "PipelineReference"}}}
          ]}
        }
      ]
    }"#;

    fn write_template(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn analyze_reports_cycle_and_still_transforms() {
        let file = write_template(CYCLIC);
        let run =
            MigrationRun::load(file.path(), MigrationConfig::default(), Path::new(".")).unwrap();
        let report = run.analyze().await.unwrap();

        assert_eq!(report.outcome.status, DeploymentStatus::Failed);
        assert!(report.diagnostics.has_code("MIG-DEP-001"));
        assert!(report.profile.dependencies.cycle.is_some());
        assert_eq!(report.profile.pipelines.len(), 2);
        assert_eq!(report.outcome.log.len(), 0);
    }

    #[tokio::test]
    async fn cycle_path_uses_configured_reference_ids() {
        let file = write_template(CYCLIC);
        let mut config = MigrationConfig::default();
        config.connections.references.push(ReferenceMapping {
            pipeline: "A".into(),
            activity: "RunSql".into(),
            location: "connection".into(),
            connection_id: "conn-direct".into(),
        });
        let run = MigrationRun::load(file.path(), config, Path::new(".")).unwrap();
        let report = run.analyze().await.unwrap();

        assert_eq!(report.outcome.resolution.direct_reference, 1);
        let a = report.outcome.pipelines.iter().find(|p| p.name == "A").unwrap();
        let activities = &a.definition.as_ref().unwrap()["properties"]["activities"];
        assert_eq!(
            activities[1]["externalReferences"]["connection"],
            serde_json::json!("conn-direct")
        );
    }

    #[test]
    fn load_records_source_digest() {
        let file = write_template(r#"{"resources": []}"#);
        let run =
            MigrationRun::load(file.path(), MigrationConfig::default(), Path::new(".")).unwrap();
        assert_eq!(run.source.sha256.len(), 64);
        assert!(run.template().components().is_empty());
    }
}
