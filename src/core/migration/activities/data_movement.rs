//! Copy, Lookup, GetMetadata and Delete.

use super::{reference_at, ActivityRule, RuleOutput, TransformScope};
use crate::core::migration::diagnostics::MigrationIssue;
use crate::core::migration::schema::{Activity, ActivityKind};
use serde_json::{Map, Value};

pub struct CopyRule;

impl ActivityRule for CopyRule {
    fn kinds(&self) -> Vec<ActivityKind> {
        vec![ActivityKind::Copy]
    }

    fn transform(
        &self,
        activity: &Activity,
        scope: &mut TransformScope<'_>,
        _depth: usize,
    ) -> Result<RuleOutput, MigrationIssue> {
        let mut properties = activity.type_properties.clone();
        if !properties.is_object() {
            properties = Value::Object(Map::new());
        }
        let mut output = RuleOutput::new("Copy", Value::Null);

        for (slot, reference) in [
            ("source", activity.inputs.first()),
            ("sink", activity.outputs.first()),
        ] {
            let settings = scope.embed_dataset(activity, reference, slot, &mut output);
            if let (Some(settings), Some(map)) = (settings, properties.as_object_mut()) {
                let side = map
                    .entry(slot.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(side) = side {
                    side.insert("datasetSettings".to_string(), settings);
                }
            }
        }

        if let Some(staging) = properties.get_mut("stagingSettings") {
            scope.rewire_linked_service(activity, staging, "staging", &mut output);
        }
        if let Some(log_location) = properties.pointer_mut("/logSettings/logLocationSettings") {
            scope.rewire_linked_service(activity, log_location, "log", &mut output);
        }
        if let Some(redirect) = properties.pointer_mut("/redirectIncompatibleRowSettings") {
            scope.rewire_linked_service(activity, redirect, "log", &mut output);
        }

        output.type_properties = properties;
        Ok(output)
    }
}

/// Lookup and GetMetadata: a single `typeProperties.dataset` reference.
pub struct DatasetReadRule;

impl ActivityRule for DatasetReadRule {
    fn kinds(&self) -> Vec<ActivityKind> {
        vec![ActivityKind::Lookup, ActivityKind::GetMetadata]
    }

    fn transform(
        &self,
        activity: &Activity,
        scope: &mut TransformScope<'_>,
        _depth: usize,
    ) -> Result<RuleOutput, MigrationIssue> {
        let mut output = RuleOutput::new(activity.kind.as_str(), Value::Null);
        output.type_properties = embed_single_dataset(activity, scope, &mut output);
        Ok(output)
    }
}

pub struct DeleteRule;

impl ActivityRule for DeleteRule {
    fn kinds(&self) -> Vec<ActivityKind> {
        vec![ActivityKind::Delete]
    }

    fn transform(
        &self,
        activity: &Activity,
        scope: &mut TransformScope<'_>,
        _depth: usize,
    ) -> Result<RuleOutput, MigrationIssue> {
        let mut output = RuleOutput::new("Delete", Value::Null);
        let mut properties = embed_single_dataset(activity, scope, &mut output);
        if let Some(log_settings) = properties.pointer_mut("/logStorageSettings") {
            scope.rewire_linked_service(activity, log_settings, "log", &mut output);
        }
        output.type_properties = properties;
        Ok(output)
    }
}

fn embed_single_dataset(
    activity: &Activity,
    scope: &mut TransformScope<'_>,
    output: &mut RuleOutput,
) -> Value {
    let mut properties = activity.type_properties.clone();
    let reference = reference_at(activity.property("dataset"));
    if reference.is_none() {
        output.deactivate = true;
        return properties;
    }
    let settings = scope.embed_dataset(activity, reference.as_ref(), "dataset", output);
    if let Some(map) = properties.as_object_mut() {
        map.remove("dataset");
        if let Some(settings) = settings {
            map.insert("datasetSettings".to_string(), settings);
        }
    }
    properties
}
