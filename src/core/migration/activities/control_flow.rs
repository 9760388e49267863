//! Container activities, pipeline invocation and pass-through control flow.

use super::{child_lists, invoked_pipeline, ActivityRule, RuleOutput, TransformScope};
use crate::core::migration::diagnostics::MigrationIssue;
use crate::core::migration::schema::{Activity, ActivityKind};
use serde_json::{json, Value};

/// IfCondition, ForEach, Until and Switch: nested lists go back through dispatch.
pub struct ContainerRule;

impl ActivityRule for ContainerRule {
    fn kinds(&self) -> Vec<ActivityKind> {
        vec![
            ActivityKind::IfCondition,
            ActivityKind::ForEach,
            ActivityKind::Until,
            ActivityKind::Switch,
        ]
    }

    fn transform(
        &self,
        activity: &Activity,
        scope: &mut TransformScope<'_>,
        depth: usize,
    ) -> Result<RuleOutput, MigrationIssue> {
        let mut properties = activity.type_properties.clone();
        for (pointer, list) in child_lists(activity) {
            let transformed = scope.transform_nested(Some(list), depth + 1)?;
            if let Some(slot) = properties.pointer_mut(&pointer) {
                *slot = transformed;
            }
        }
        Ok(RuleOutput::new(activity.kind.as_str(), properties))
    }
}

/// ExecutePipeline → InvokePipeline against the already deployed child.
pub struct InvokePipelineRule;

impl ActivityRule for InvokePipelineRule {
    fn kinds(&self) -> Vec<ActivityKind> {
        vec![ActivityKind::ExecutePipeline]
    }

    fn transform(
        &self,
        activity: &Activity,
        scope: &mut TransformScope<'_>,
        _depth: usize,
    ) -> Result<RuleOutput, MigrationIssue> {
        let env = scope.env();
        let child = invoked_pipeline(activity).unwrap_or_default().to_string();
        let pipeline_id = scope.resolve(activity, "pipeline", None, None, Some(&child));

        let mut output = RuleOutput::new(
            "InvokePipeline",
            json!({
                "operationType": "InvokeFabricPipeline",
                "pipelineId": pipeline_id.clone().unwrap_or_else(|| child.clone()),
                "workspaceId": env.workspace_id.unwrap_or_default(),
                "waitOnCompletion": activity
                    .property("waitOnCompletion")
                    .cloned()
                    .unwrap_or(Value::Bool(true)),
                "parameters": activity
                    .property("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({})),
            }),
        );
        output.connection = env.invoke_connection_id.map(str::to_string);
        output.deactivate = pipeline_id.is_none();
        Ok(output)
    }
}

/// Wait, SetVariable, AppendVariable, Filter and Fail carry over unchanged.
pub struct PassthroughRule;

impl ActivityRule for PassthroughRule {
    fn kinds(&self) -> Vec<ActivityKind> {
        vec![
            ActivityKind::Wait,
            ActivityKind::SetVariable,
            ActivityKind::AppendVariable,
            ActivityKind::Filter,
            ActivityKind::Fail,
        ]
    }

    fn transform(
        &self,
        activity: &Activity,
        _scope: &mut TransformScope<'_>,
        _depth: usize,
    ) -> Result<RuleOutput, MigrationIssue> {
        Ok(RuleOutput::new(
            activity.kind.as_str(),
            activity.type_properties.clone(),
        ))
    }
}
