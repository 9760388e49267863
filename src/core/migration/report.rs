#![allow(clippy::result_large_err)]

//! Migration profile: the JSON document written by `analyze`, `transform`
//! and `deploy`.

use crate::core::deploy::orchestrator::{DeploymentOutcome, DeploymentStatus};
use crate::core::error::AppError;
use crate::core::migration::connectors::{ConnectionAction, ConnectionPlan, MappingConfidence};
use crate::core::migration::diagnostics::{Diagnostic, Diagnostics};
use crate::core::migration::graph::{DependencyEdge, DependencyGraph};
use crate::core::migration::pipeline::{PipelineState, PipelineTransformation};
use crate::core::migration::resolver::ResolutionStats;
use crate::core::migration::schema::{ComponentKind, NamingConvention, ParsedTemplate};
use crate::core::migration::triggers::ScheduleBinding;
use crate::core::types::ErrorSeverity;
use crate::utils::{FileSerializer, FileUtils, PrettyJsonSerializer};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Hex SHA-256 of the source document.
pub fn source_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceProfile {
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyProfile {
    pub edges: Vec<DependencyEdge>,
    pub waves: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<Vec<String>>,
    #[serde(skip)]
    pub dot: String,
}

impl DependencyProfile {
    pub fn from_graph(graph: &DependencyGraph) -> Self {
        Self {
            edges: graph.edges(),
            waves: graph.deployment_waves().unwrap_or_default(),
            cycle: graph.find_cycle(),
            dot: graph.to_dot(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationSummary {
    pub pipelines_transformed: usize,
    pub pipelines_failed: usize,
    pub activities_transformed: usize,
    pub activities_inactive: usize,
    pub connections_created: usize,
    pub connections_existing: usize,
    pub connections_skipped: usize,
    pub low_confidence_connections: usize,
    pub schedules: usize,
    pub resources_created: usize,
    pub errors: usize,
    pub warnings: usize,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
    pub rolled_back: bool,
}

impl MigrationSummary {
    fn collect(outcome: &DeploymentOutcome, diagnostics: &Diagnostics) -> Self {
        let mut summary = MigrationSummary {
            dry_run: outcome.dry_run,
            status: Some(outcome.status),
            rolled_back: outcome.status == DeploymentStatus::RolledBack,
            resources_created: outcome.log.len(),
            schedules: outcome.schedules.len(),
            ..Default::default()
        };
        for pipeline in &outcome.pipelines {
            match pipeline.state {
                PipelineState::Transformed => summary.pipelines_transformed += 1,
                PipelineState::Failed => summary.pipelines_failed += 1,
                _ => {}
            }
            summary.activities_transformed += pipeline.activities.transformed;
            summary.activities_inactive += pipeline.activities.inactive;
        }
        for plan in &outcome.connections {
            match plan.action {
                ConnectionAction::Create => summary.connections_created += 1,
                ConnectionAction::Existing => summary.connections_existing += 1,
                ConnectionAction::Skip => summary.connections_skipped += 1,
            }
            if plan.translation.confidence == MappingConfidence::Low {
                summary.low_confidence_connections += 1;
            }
        }
        let counts = diagnostics.count_by_severity();
        summary.errors = counts.get(&ErrorSeverity::Error).copied().unwrap_or(0);
        summary.warnings = counts.get(&ErrorSeverity::Warning).copied().unwrap_or(0);
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationProfile {
    pub generated_at: DateTime<Utc>,
    pub source: SourceProfile,
    pub components: BTreeMap<ComponentKind, usize>,
    pub conventions: BTreeMap<NamingConvention, usize>,
    pub shared_parameters: usize,
    pub dependencies: DependencyProfile,
    pub connections: Vec<ConnectionPlan>,
    pub resolution: ResolutionStats,
    pub pipelines: Vec<PipelineTransformation>,
    pub schedules: Vec<ScheduleBinding>,
    pub summary: MigrationSummary,
    pub diagnostics: Vec<Diagnostic>,
}

impl MigrationProfile {
    pub fn assemble(
        template: &ParsedTemplate,
        source: SourceProfile,
        dependencies: DependencyProfile,
        outcome: &DeploymentOutcome,
        diagnostics: &Diagnostics,
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            source,
            components: template.counts(),
            conventions: template.convention_counts(),
            shared_parameters: template.shared_parameters().len(),
            dependencies,
            connections: outcome.connections.clone(),
            resolution: outcome.resolution,
            pipelines: outcome.pipelines.clone(),
            schedules: outcome.schedules.clone(),
            summary: MigrationSummary::collect(outcome, diagnostics),
            diagnostics: diagnostics.sorted(),
        }
    }

    pub fn to_json(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        FileUtils
            .save_to_file(path, self, &PrettyJsonSerializer)
            .map_err(AppError::from)
    }

    /// One line per count, for the terminal.
    pub fn summary_lines(&self) -> Vec<String> {
        let s = &self.summary;
        let mut lines = vec![
            format!(
                "pipelines: {} transformed, {} failed",
                s.pipelines_transformed, s.pipelines_failed
            ),
            format!(
                "activities: {} transformed, {} inactive",
                s.activities_transformed, s.activities_inactive
            ),
            format!(
                "connections: {} to create, {} existing, {} skipped ({} low confidence)",
                s.connections_created,
                s.connections_existing,
                s.connections_skipped,
                s.low_confidence_connections
            ),
            format!("schedules: {}", s.schedules),
            format!(
                "resolution: tier1={} tier2={} tier3={} tier4={} failed={}",
                self.resolution.direct_reference,
                self.resolution.property_match,
                self.resolution.connection_bridge,
                self.resolution.deployed_target,
                self.resolution.failed
            ),
            format!("diagnostics: {} errors, {} warnings", s.errors, s.warnings),
        ];
        if let Some(cycle) = &self.dependencies.cycle {
            lines.push(format!("dependency cycle: {}", cycle.join(" -> ")));
        }
        if let Some(status) = s.status {
            lines.push(format!(
                "status: {:?}{}",
                status,
                if s.dry_run { " (dry run)" } else { "" }
            ));
        }
        lines
    }
}
