//! Per-activity-type transformation rules and the recursive dispatch walker.

pub mod compute;
pub mod control_flow;
pub mod data_movement;

use crate::core::migration::datasets::DatasetResolver;
use crate::core::migration::diagnostics::{Diagnostics, MigrationIssue};
use crate::core::migration::resolver::{
    ConnectionResolver, ReferenceKey, ResolutionContext, ResolveRequest,
};
use crate::core::migration::schema::{Activity, ActivityKind, ParsedTemplate, Reference};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// What a rule produced for one activity.
#[derive(Debug, Clone)]
pub struct RuleOutput {
    pub target_type: String,
    pub type_properties: Value,
    pub connection: Option<String>,
    pub deactivate: bool,
}

impl RuleOutput {
    pub fn new(target_type: impl Into<String>, type_properties: Value) -> Self {
        Self {
            target_type: target_type.into(),
            type_properties,
            connection: None,
            deactivate: false,
        }
    }
}

/// Transformation rule for one or more activity kinds.
pub trait ActivityRule: Send + Sync + 'static {
    /// Source activity kinds handled by this rule.
    fn kinds(&self) -> Vec<ActivityKind>;

    fn transform(
        &self,
        activity: &Activity,
        scope: &mut TransformScope<'_>,
        depth: usize,
    ) -> Result<RuleOutput, MigrationIssue>;
}

/// Builder used to register rules before transformation.
pub struct ActivityRegistryBuilder {
    rules: HashMap<ActivityKind, Arc<dyn ActivityRule>>,
}

impl Default for ActivityRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityRegistryBuilder {
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn register<T: ActivityRule>(&mut self, rule: T) -> &mut Self {
        let rule: Arc<dyn ActivityRule> = Arc::new(rule);
        for kind in rule.kinds() {
            self.rules.insert(kind, Arc::clone(&rule));
        }
        self
    }

    pub fn build(self) -> ActivityRegistry {
        ActivityRegistry {
            inner: Arc::new(self.rules),
        }
    }
}

/// Immutable kind → rule table.
#[derive(Clone)]
pub struct ActivityRegistry {
    inner: Arc<HashMap<ActivityKind, Arc<dyn ActivityRule>>>,
}

impl Default for ActivityRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ActivityRegistry {
    pub fn builder() -> ActivityRegistryBuilder {
        ActivityRegistryBuilder::new()
    }

    /// Registry with a rule for every known activity kind.
    pub fn standard() -> Self {
        let mut builder = Self::builder();
        builder
            .register(data_movement::CopyRule)
            .register(data_movement::DatasetReadRule)
            .register(data_movement::DeleteRule)
            .register(control_flow::ContainerRule)
            .register(control_flow::InvokePipelineRule)
            .register(control_flow::PassthroughRule)
            .register(compute::LinkedServiceRule)
            .register(compute::WebRule)
            .register(compute::NotebookRule);
        builder.build()
    }

    pub fn get(&self, kind: &ActivityKind) -> Option<Arc<dyn ActivityRule>> {
        self.inner.get(kind).cloned()
    }

    pub fn supports(&self, kind: &ActivityKind) -> bool {
        self.inner.contains_key(kind)
    }
}

/// Per-pipeline activity counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivityTally {
    pub transformed: usize,
    pub inactive: usize,
    pub unsupported: usize,
}

/// Read-only inputs shared by every rule while one pipeline is transformed.
#[derive(Clone, Copy)]
pub struct ActivityEnvironment<'a> {
    pub pipeline: &'a str,
    pub template: &'a ParsedTemplate,
    pub resolution: &'a ResolutionContext,
    pub workspace_id: Option<&'a str>,
    pub invoke_connection_id: Option<&'a str>,
    pub max_depth: usize,
}

/// Mutable state threaded through the recursive walk of one pipeline.
pub struct TransformScope<'a> {
    env: ActivityEnvironment<'a>,
    registry: &'a ActivityRegistry,
    datasets: DatasetResolver<'a>,
    resolver: &'a mut ConnectionResolver,
    diagnostics: &'a mut Diagnostics,
    tally: ActivityTally,
}

impl<'a> TransformScope<'a> {
    pub fn new(
        env: ActivityEnvironment<'a>,
        registry: &'a ActivityRegistry,
        resolver: &'a mut ConnectionResolver,
        diagnostics: &'a mut Diagnostics,
    ) -> Self {
        Self {
            datasets: DatasetResolver::new(env.template),
            env,
            registry,
            resolver,
            diagnostics,
            tally: ActivityTally::default(),
        }
    }

    pub fn env(&self) -> ActivityEnvironment<'a> {
        self.env
    }

    pub fn tally(&self) -> ActivityTally {
        self.tally
    }

    pub fn location(&self, activity: &Activity) -> String {
        format!("{}/{}", self.env.pipeline, activity.name)
    }

    /// Transform a top-level or nested activity list.
    pub fn transform_activities(
        &mut self,
        activities: &[Activity],
        depth: usize,
    ) -> Result<Vec<Value>, MigrationIssue> {
        if depth > self.env.max_depth {
            return Err(MigrationIssue::NestingTooDeep {
                limit: self.env.max_depth,
            });
        }
        activities
            .iter()
            .map(|activity| self.transform_one(activity, depth))
            .collect()
    }

    /// Transform a raw JSON activity list found inside `typeProperties`.
    pub fn transform_nested(
        &mut self,
        raw: Option<&Value>,
        depth: usize,
    ) -> Result<Value, MigrationIssue> {
        let Some(items) = raw.and_then(Value::as_array) else {
            return Ok(Value::Array(Vec::new()));
        };
        if depth > self.env.max_depth {
            return Err(MigrationIssue::NestingTooDeep {
                limit: self.env.max_depth,
            });
        }
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<Activity>(item.clone()) {
                Ok(activity) => out.push(self.transform_one(&activity, depth)?),
                Err(err) => {
                    let name = item
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("<unnamed>")
                        .to_string();
                    self.diagnostics.at(
                        format!("{}/{}", self.env.pipeline, name),
                        MigrationIssue::UnreadableDefinition {
                            kind: "activity".to_string(),
                            name,
                            reason: err.to_string(),
                        },
                    );
                    self.tally.inactive += 1;
                    out.push(mark_inactive(item.clone()));
                }
            }
        }
        Ok(Value::Array(out))
    }

    fn transform_one(
        &mut self,
        activity: &Activity,
        depth: usize,
    ) -> Result<Value, MigrationIssue> {
        let Some(rule) = self.registry.get(&activity.kind) else {
            self.diagnostics.at(
                self.location(activity),
                MigrationIssue::UnsupportedActivity {
                    activity_type: activity.kind.to_string(),
                },
            );
            self.tally.unsupported += 1;
            self.tally.inactive += 1;
            let original = serde_json::to_value(activity).unwrap_or(Value::Null);
            return Ok(mark_inactive(original));
        };

        let output = rule.transform(activity, self, depth)?;
        let mut envelope = envelope(activity, &output);
        if output.deactivate {
            envelope = mark_inactive(envelope);
            self.tally.inactive += 1;
        } else {
            self.tally.transformed += 1;
        }
        tracing::trace!(
            pipeline = self.env.pipeline,
            activity = %activity.name,
            source_type = %activity.kind,
            target_type = %output.target_type,
            "Transformed activity"
        );
        Ok(envelope)
    }

    /// Resolve a connection slot; a miss leaves the diagnostic behind.
    pub fn resolve(
        &mut self,
        activity: &Activity,
        location: &str,
        linked_service: Option<&str>,
        properties: Option<&Value>,
        invoked_pipeline: Option<&str>,
    ) -> Option<String> {
        let mut request =
            ResolveRequest::new(ReferenceKey::new(self.env.pipeline, &activity.name, location))
                .linked_service(linked_service);
        if let Some(props) = properties {
            request = request.properties(props);
        }
        if let Some(pipeline) = invoked_pipeline {
            request = request.invoking(pipeline);
        }
        self.resolver
            .resolve(&request, self.env.resolution, self.diagnostics)
            .target_connection_id
    }

    /// Embed a dataset reference and attach its resolved connection.
    /// Returns None (and flags the output inactive) when either step fails.
    pub fn embed_dataset(
        &mut self,
        activity: &Activity,
        reference: Option<&Reference>,
        location: &str,
        output: &mut RuleOutput,
    ) -> Option<Value> {
        let reference = reference?;
        let slot = format!("{}#{}", self.location(activity), location);
        let embedded = match self.datasets.embed(reference, &slot, self.diagnostics) {
            Ok(embedded) => embedded,
            Err(issue) => {
                self.diagnostics.at(slot, issue);
                output.deactivate = true;
                return None;
            }
        };

        let mut settings = embedded.settings;
        match self.resolve(
            activity,
            location,
            embedded.linked_service.as_deref(),
            Some(&activity.type_properties),
            None,
        ) {
            Some(id) => {
                if let Value::Object(map) = &mut settings {
                    map.insert("externalReferences".to_string(), json!({"connection": id}));
                }
            }
            None => output.deactivate = true,
        }
        Some(settings)
    }

    /// Resolve a `{linkedServiceName: {referenceName}}` slot nested in properties
    /// and replace it with an external connection reference.
    pub fn rewire_linked_service(
        &mut self,
        activity: &Activity,
        container: &mut Value,
        location: &str,
        output: &mut RuleOutput,
    ) {
        let Some(name) = container
            .pointer("/linkedServiceName/referenceName")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return;
        };
        let resolved = self.resolve(activity, location, Some(&name), None, None);
        if let Value::Object(map) = container {
            map.remove("linkedServiceName");
            match resolved {
                Some(id) => {
                    map.insert("externalReferences".to_string(), json!({"connection": id}));
                }
                None => output.deactivate = true,
            }
        }
    }

    /// Drop a field that has no target equivalent, reporting it.
    pub fn suppress(&mut self, activity: &Activity, properties: &mut Value, field: &str) {
        if let Some(map) = properties.as_object_mut() {
            if map.remove(field).is_some() {
                self.diagnostics.at(
                    self.location(activity),
                    MigrationIssue::SuppressedField {
                        field: format!("typeProperties.{}", field),
                    },
                );
            }
        }
    }
}

/// Common activity envelope around a rule's output.
fn envelope(activity: &Activity, output: &RuleOutput) -> Value {
    let mut map = Map::new();
    map.insert("name".to_string(), Value::String(activity.name.clone()));
    map.insert("type".to_string(), Value::String(output.target_type.clone()));
    if let Some(description) = &activity.description {
        map.insert("description".to_string(), Value::String(description.clone()));
    }
    map.insert("dependsOn".to_string(), Value::Array(activity.depends_on.clone()));
    if let Some(policy) = &activity.policy {
        map.insert("policy".to_string(), policy.clone());
    }
    map.insert(
        "userProperties".to_string(),
        Value::Array(activity.user_properties.clone()),
    );
    map.insert("typeProperties".to_string(), output.type_properties.clone());
    if let Some(connection) = &output.connection {
        map.insert("externalReferences".to_string(), json!({"connection": connection}));
    }
    if let Some(state) = &activity.state {
        map.insert("state".to_string(), Value::String(state.clone()));
    }
    for (key, value) in &activity.extra {
        map.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Value::Object(map)
}

/// Keep the activity but disable it so the pipeline still validates.
pub fn mark_inactive(mut activity: Value) -> Value {
    if let Value::Object(map) = &mut activity {
        map.insert("state".to_string(), Value::String("Inactive".to_string()));
        map.insert(
            "onInactiveMarkAs".to_string(),
            Value::String("Succeeded".to_string()),
        );
    }
    activity
}

/// Raw nested activity lists of a control-flow activity, keyed by their
/// JSON pointer relative to `typeProperties`.
pub fn child_lists(activity: &Activity) -> Vec<(String, &Value)> {
    let props = &activity.type_properties;
    let keys: &[&str] = match activity.kind {
        ActivityKind::IfCondition => &["ifTrueActivities", "ifFalseActivities"],
        ActivityKind::ForEach | ActivityKind::Until => &["activities"],
        ActivityKind::Switch => &["defaultActivities"],
        _ => &[],
    };
    let mut lists: Vec<(String, &Value)> = keys
        .iter()
        .filter_map(|key| props.get(*key).map(|v| (format!("/{}", key), v)))
        .collect();
    if activity.kind == ActivityKind::Switch {
        if let Some(cases) = props.get("cases").and_then(Value::as_array) {
            for (idx, case) in cases.iter().enumerate() {
                if let Some(list) = case.get("activities") {
                    lists.push((format!("/cases/{}/activities", idx), list));
                }
            }
        }
    }
    lists
}

/// Names of pipelines invoked anywhere in `activities`, nested lists included.
pub fn collect_invocations(activities: &[Activity], max_depth: usize) -> Vec<String> {
    let mut found = Vec::new();
    collect_into(activities, 1, max_depth, &mut found);
    found.sort();
    found.dedup();
    found
}

fn collect_into(activities: &[Activity], depth: usize, max_depth: usize, found: &mut Vec<String>) {
    if depth > max_depth {
        return;
    }
    for activity in activities {
        if activity.kind == ActivityKind::ExecutePipeline {
            if let Some(name) = invoked_pipeline(activity) {
                found.push(name.to_string());
            }
        }
        for (_, list) in child_lists(activity) {
            let nested: Vec<Activity> = list
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| serde_json::from_value(item.clone()).ok())
                        .collect()
                })
                .unwrap_or_default();
            collect_into(&nested, depth + 1, max_depth, found);
        }
    }
}

pub(crate) fn invoked_pipeline(activity: &Activity) -> Option<&str> {
    activity
        .type_properties
        .pointer("/pipeline/referenceName")
        .and_then(Value::as_str)
}

/// Parse a `{referenceName, parameters}` value into a Reference.
pub(crate) fn reference_at(value: Option<&Value>) -> Option<Reference> {
    value.and_then(|v| serde_json::from_value(v.clone()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn activity(value: Value) -> Activity {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn standard_registry_covers_every_known_kind() {
        let registry = ActivityRegistry::standard();
        for kind in ActivityKind::KNOWN {
            assert!(registry.supports(kind), "missing rule for {}", kind);
        }
        assert!(!registry.supports(&ActivityKind::Other("ExecuteDataFlow".into())));
    }

    #[test]
    fn invocations_are_found_in_nested_switch_cases() {
        let activities = vec![activity(json!({
            "name": "Route",
            "type": "Switch",
            "typeProperties": {
                "on": "@pipeline().parameters.mode",
                "cases": [{
                    "value": "full",
                    "activities": [{
                        "name": "Loop",
                        "type": "ForEach",
                        "typeProperties": {
                            "items": "@pipeline().parameters.tables",
                            "activities": [{
                                "name": "RunChild",
                                "type": "ExecutePipeline",
                                "typeProperties": {"pipeline": {"referenceName": "Child", "type": "PipelineReference"}}
                            }]
                        }
                    }]
                }],
                "defaultActivities": [{
                    "name": "RunOther",
                    "type": "ExecutePipeline",
                    "typeProperties": {"pipeline": {"referenceName": "Other", "type": "PipelineReference"}}
                }]
            }
        }))];
        assert_eq!(collect_invocations(&activities, 32), vec!["Child", "Other"]);
        assert_eq!(collect_invocations(&activities, 1), Vec::<String>::new());
    }

    #[test]
    fn mark_inactive_sets_both_flags() {
        let value = mark_inactive(json!({"name": "x"}));
        assert_eq!(value["state"], "Inactive");
        assert_eq!(value["onInactiveMarkAs"], "Succeeded");
    }
}
