#![allow(clippy::result_large_err)]

//! Append-only record of created resources and reverse-order rollback.

use crate::core::deploy::client::WorkspaceClient;
use crate::core::error::AppError;
use crate::core::types::{ErrorCategory, ResourceKind};
use crate::utils::{FileSerializer, FileUtils, PrettyJsonSerializer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub kind: ResourceKind,
    pub source_name: String,
    pub target_id: String,
    /// Owning item for schedules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn new(
        kind: ResourceKind,
        source_name: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            source_name: source_name.into(),
            target_id: target_id.into(),
            parent_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLog {
    pub run_id: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub records: Vec<DeploymentRecord>,
}

/// Outcome of replaying a log in reverse.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackReport {
    pub deleted: Vec<DeploymentRecord>,
    pub failed: Vec<RollbackFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackFailure {
    pub record: DeploymentRecord,
    pub reason: String,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl DeploymentLog {
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            dry_run,
            started_at: Utc::now(),
            records: Vec::new(),
        }
    }

    pub fn append(&mut self, record: DeploymentRecord) {
        tracing::debug!(
            kind = %record.kind,
            source = %record.source_name,
            target_id = %record.target_id,
            "Recorded created resource"
        );
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &DeploymentRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    /// `<dir>/deployment-<run_id>.json`
    pub fn default_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("deployment-{}.json", self.run_id))
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        FileUtils
            .save_to_file(path, self, &PrettyJsonSerializer)
            .map_err(|err| {
                AppError::new(
                    ErrorCategory::IoError,
                    format!("failed to write deployment log {}: {}", path.display(), err),
                )
                .with_code("MIG-DEPLOY-010")
            })
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        FileUtils
            .load_from_file(path, &PrettyJsonSerializer)
            .map_err(|err| {
                AppError::new(
                    ErrorCategory::SerializationError,
                    format!("failed to read deployment log {}: {}", path.display(), err),
                )
                .with_code("MIG-DEPLOY-011")
                .with_suggestion("Pass a file written by `ferry deploy` to `ferry rollback`")
            })
    }

    /// Delete every recorded resource, newest first. Failures are collected
    /// and the walk continues. Dry-run logs delete nothing.
    pub async fn rollback(&self, client: &dyn WorkspaceClient) -> RollbackReport {
        let mut report = RollbackReport::default();
        for record in self.records.iter().rev() {
            if self.dry_run {
                report.deleted.push(record.clone());
                continue;
            }
            match client.delete(record).await {
                Ok(()) => {
                    tracing::info!(
                        kind = %record.kind,
                        source = %record.source_name,
                        "Rolled back resource"
                    );
                    report.deleted.push(record.clone());
                }
                Err(err) => {
                    tracing::error!(
                        kind = %record.kind,
                        source = %record.source_name,
                        error = %err,
                        "Rollback delete failed"
                    );
                    report.failed.push(RollbackFailure {
                        record: record.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        report
    }
}
