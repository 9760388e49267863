//! Activities that run on an external compute or service connection.

use super::{ActivityRule, RuleOutput, TransformScope};
use crate::core::migration::diagnostics::MigrationIssue;
use crate::core::migration::schema::{Activity, ActivityKind};
use serde_json::{json, Value};

/// Activities bound to a `linkedServiceName`: scripts, stored procedures,
/// functions, Databricks, HDInsight and Custom.
pub struct LinkedServiceRule;

impl LinkedServiceRule {
    fn location(kind: &ActivityKind) -> &'static str {
        match kind {
            ActivityKind::Script
            | ActivityKind::SqlServerStoredProcedure
            | ActivityKind::AzureFunctionActivity => "connection",
            _ => "cluster",
        }
    }

    fn suppressed(kind: &ActivityKind) -> &'static [&'static str] {
        match kind {
            ActivityKind::Custom => &["referenceObjects", "resourceLinkedService"],
            ActivityKind::HDInsightHive
            | ActivityKind::HDInsightPig
            | ActivityKind::HDInsightSpark
            | ActivityKind::HDInsightMapReduce
            | ActivityKind::HDInsightStreaming => &["scriptLinkedService", "storageLinkedServices"],
            _ => &[],
        }
    }
}

impl ActivityRule for LinkedServiceRule {
    fn kinds(&self) -> Vec<ActivityKind> {
        vec![
            ActivityKind::Script,
            ActivityKind::SqlServerStoredProcedure,
            ActivityKind::AzureFunctionActivity,
            ActivityKind::DatabricksNotebook,
            ActivityKind::DatabricksSparkJar,
            ActivityKind::DatabricksSparkPython,
            ActivityKind::HDInsightHive,
            ActivityKind::HDInsightPig,
            ActivityKind::HDInsightSpark,
            ActivityKind::HDInsightMapReduce,
            ActivityKind::HDInsightStreaming,
            ActivityKind::Custom,
        ]
    }

    fn transform(
        &self,
        activity: &Activity,
        scope: &mut TransformScope<'_>,
        _depth: usize,
    ) -> Result<RuleOutput, MigrationIssue> {
        let mut properties = activity.type_properties.clone();
        for field in Self::suppressed(&activity.kind) {
            scope.suppress(activity, &mut properties, field);
        }

        let linked_service = activity
            .linked_service_name
            .as_ref()
            .map(|r| r.reference_name.as_str());
        let connection = scope.resolve(
            activity,
            Self::location(&activity.kind),
            linked_service,
            Some(&activity.type_properties),
            None,
        );

        let mut output = RuleOutput::new(activity.kind.as_str(), properties);
        output.deactivate = connection.is_none();
        output.connection = connection;
        Ok(output)
    }
}

/// WebActivity and WebHook keep their request definition; dataset and
/// linked-service attachments have no counterpart.
pub struct WebRule;

impl ActivityRule for WebRule {
    fn kinds(&self) -> Vec<ActivityKind> {
        vec![ActivityKind::WebActivity, ActivityKind::WebHook]
    }

    fn transform(
        &self,
        activity: &Activity,
        scope: &mut TransformScope<'_>,
        _depth: usize,
    ) -> Result<RuleOutput, MigrationIssue> {
        let mut properties = activity.type_properties.clone();
        for field in ["datasets", "linkedServices", "connectVia"] {
            scope.suppress(activity, &mut properties, field);
        }
        Ok(RuleOutput::new(activity.kind.as_str(), properties))
    }
}

/// SynapseNotebook → TridentNotebook; the notebook id comes from the resolver.
pub struct NotebookRule;

impl ActivityRule for NotebookRule {
    fn kinds(&self) -> Vec<ActivityKind> {
        vec![ActivityKind::SynapseNotebook]
    }

    fn transform(
        &self,
        activity: &Activity,
        scope: &mut TransformScope<'_>,
        _depth: usize,
    ) -> Result<RuleOutput, MigrationIssue> {
        let mut properties = activity.type_properties.clone();
        for field in [
            "sparkPool",
            "executorSize",
            "driverSize",
            "numExecutors",
            "conf",
            "configurationType",
        ] {
            scope.suppress(activity, &mut properties, field);
        }

        let notebook = activity
            .type_properties
            .pointer("/notebook/referenceName")
            .and_then(Value::as_str)
            .map(str::to_string);
        let notebook_id = scope.resolve(
            activity,
            "notebook",
            notebook.as_deref(),
            Some(&activity.type_properties),
            None,
        );

        let parameters = properties
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let mut output = RuleOutput::new(
            "TridentNotebook",
            json!({
                "notebookId": notebook_id.clone().or(notebook).unwrap_or_default(),
                "workspaceId": scope.env().workspace_id.unwrap_or_default(),
                "parameters": parameters,
            }),
        );
        output.deactivate = notebook_id.is_none();
        Ok(output)
    }
}
