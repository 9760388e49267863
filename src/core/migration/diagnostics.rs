//! Issue taxonomy and the per-run diagnostics collector.

use crate::core::types::ErrorSeverity;
use serde::Serialize;
use std::collections::BTreeMap;

/// Every condition the migration engine can report.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MigrationIssue {
    #[error("malformed document: {reason}")]
    MalformedDocument { reason: String },

    #[error("cannot resolve name expression '{expression}': {reason}")]
    UnresolvableNameExpression { expression: String, reason: String },

    #[error("{kind} '{name}' is defined more than once; the first definition is kept")]
    DuplicateComponent { kind: String, name: String },

    #[error("resource type '{resource_type}' is not migrated")]
    SkippedResource { resource_type: String },

    #[error("definition of {kind} '{name}' could not be read: {reason}")]
    UnreadableDefinition {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("field '{field}' is deprecated, use '{replacement}'")]
    DeprecatedField { field: String, replacement: String },

    #[error("connector type '{connector_type}' has no target mapping")]
    UnmappedConnector { connector_type: String },

    #[error("authentication '{auth}' is not supported by target connector '{target_type}'")]
    UnsupportedAuthentication { auth: String, target_type: String },

    #[error("dataset '{dataset}' not found")]
    DatasetNotFound { dataset: String },

    #[error("dataset parameter '{parameter}' has no binding and no default")]
    UnboundDatasetParameter { parameter: String },

    #[error("activity type '{activity_type}' has no mapping rule")]
    UnsupportedActivity { activity_type: String },

    #[error("field '{field}' has no target equivalent and was dropped")]
    SuppressedField { field: String },

    #[error("activity nesting exceeds the limit of {limit}")]
    NestingTooDeep { limit: usize },

    #[error("no connection resolved for slot '{location}'")]
    ConnectionUnresolved {
        location: String,
        linked_service: Option<String>,
    },

    #[error("connection reference '{key}' was resolved more than once")]
    DuplicateReferenceKey { key: String },

    #[error(
        "shared-parameter rewrite incomplete: detected {detected}, rewritten {rewritten}, {remaining} legacy references remain"
    )]
    TransformationIncomplete {
        detected: usize,
        rewritten: usize,
        remaining: usize,
    },

    #[error("shared parameter '{name}' is referenced but not declared")]
    UnknownSharedParameter { name: String },

    #[error("shared parameter '{name}' of type '{declared_type}' is stored as a string")]
    CoercedVariableType { name: String, declared_type: String },

    #[error("pipeline '{pipeline}' is invoked but not present in the document")]
    MissingPipelineReference { pipeline: String },

    #[error("circular pipeline dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("trigger '{trigger}' of type '{trigger_type}' is not supported")]
    UnsupportedTrigger {
        trigger: String,
        trigger_type: String,
    },

    #[error("deployment of {resource} '{name}' failed: {reason}")]
    DeploymentFailed {
        resource: String,
        name: String,
        reason: String,
    },
}

impl MigrationIssue {
    pub fn code(&self) -> &'static str {
        match self {
            MigrationIssue::MalformedDocument { .. } => "MIG-PARSE-001",
            MigrationIssue::UnresolvableNameExpression { .. } => "MIG-PARSE-002",
            MigrationIssue::DuplicateComponent { .. } => "MIG-PARSE-003",
            MigrationIssue::SkippedResource { .. } => "MIG-PARSE-004",
            MigrationIssue::UnreadableDefinition { .. } => "MIG-PARSE-005",
            MigrationIssue::DeprecatedField { .. } => "MIG-PARSE-006",
            MigrationIssue::UnmappedConnector { .. } => "MIG-CONN-001",
            MigrationIssue::UnsupportedAuthentication { .. } => "MIG-CONN-002",
            MigrationIssue::DatasetNotFound { .. } => "MIG-DATA-001",
            MigrationIssue::UnboundDatasetParameter { .. } => "MIG-DATA-002",
            MigrationIssue::UnsupportedActivity { .. } => "MIG-ACT-001",
            MigrationIssue::SuppressedField { .. } => "MIG-ACT-002",
            MigrationIssue::NestingTooDeep { .. } => "MIG-ACT-003",
            MigrationIssue::ConnectionUnresolved { .. } => "MIG-RES-001",
            MigrationIssue::DuplicateReferenceKey { .. } => "MIG-RES-002",
            MigrationIssue::TransformationIncomplete { .. } => "MIG-EXPR-001",
            MigrationIssue::UnknownSharedParameter { .. } => "MIG-EXPR-002",
            MigrationIssue::CoercedVariableType { .. } => "MIG-EXPR-003",
            MigrationIssue::MissingPipelineReference { .. } => "MIG-DEP-002",
            MigrationIssue::CircularDependency { .. } => "MIG-DEP-001",
            MigrationIssue::UnsupportedTrigger { .. } => "MIG-TRIG-001",
            MigrationIssue::DeploymentFailed { .. } => "MIG-DEPLOY-001",
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MigrationIssue::MalformedDocument { .. }
            | MigrationIssue::NestingTooDeep { .. }
            | MigrationIssue::DuplicateReferenceKey { .. }
            | MigrationIssue::CircularDependency { .. }
            | MigrationIssue::DeploymentFailed { .. } => ErrorSeverity::Error,
            MigrationIssue::SkippedResource { .. }
            | MigrationIssue::SuppressedField { .. }
            | MigrationIssue::DeprecatedField { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Warning,
        }
    }

    /// Issues that stop a run instead of degrading a single component.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrationIssue::MalformedDocument { .. } | MigrationIssue::CircularDependency { .. }
        )
    }
}

/// One reported issue with its stable code, severity and location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub code: &'static str,
    pub severity: ErrorSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub issue: MigrationIssue,
}

/// Accumulates diagnostics for one migration run.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: MigrationIssue, location: Option<String>) {
        let diagnostic = Diagnostic {
            code: issue.code(),
            severity: issue.severity(),
            message: issue.to_string(),
            location,
            issue,
        };
        match diagnostic.severity {
            ErrorSeverity::Error => tracing::error!(
                code = diagnostic.code,
                location = diagnostic.location.as_deref().unwrap_or(""),
                "{}",
                diagnostic.message
            ),
            ErrorSeverity::Warning => tracing::warn!(
                code = diagnostic.code,
                location = diagnostic.location.as_deref().unwrap_or(""),
                "{}",
                diagnostic.message
            ),
            _ => tracing::debug!(
                code = diagnostic.code,
                location = diagnostic.location.as_deref().unwrap_or(""),
                "{}",
                diagnostic.message
            ),
        }
        self.entries.push(diagnostic);
    }

    pub fn at(&mut self, location: impl Into<String>, issue: MigrationIssue) {
        self.push(issue, Some(location.into()));
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.entries.iter().any(|d| d.code == code)
    }

    pub fn with_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.entries.iter().filter(move |d| d.code == code)
    }

    pub fn count_by_severity(&self) -> BTreeMap<ErrorSeverity, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.severity).or_insert(0) += 1;
        }
        counts
    }

    /// Diagnostics ordered by severity, then code, then location.
    pub fn sorted(&self) -> Vec<Diagnostic> {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then_with(|| a.code.cmp(b.code))
                .then_with(|| a.location.cmp(&b.location))
        });
        entries
    }
}
