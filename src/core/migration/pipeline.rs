#![allow(clippy::result_large_err)]

//! Pipeline-level transformation: activity dispatch, expression rewrite and
//! the per-pipeline state machine.

use crate::core::config::MigrationConfig;
use crate::core::error::AppError;
use crate::core::migration::activities::{
    ActivityEnvironment, ActivityRegistry, ActivityTally, TransformScope,
};
use crate::core::migration::diagnostics::{Diagnostics, MigrationIssue};
use crate::core::migration::expression::{ExpressionReport, SharedParameterRewriter};
use crate::core::migration::resolver::{ConnectionResolver, ResolutionContext};
use crate::core::migration::schema::{ComponentKind, ComponentPayload, ParsedTemplate};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Unvisited,
    Transforming,
    Transformed,
    Failed,
}

/// Settings that shape every transformed pipeline.
#[derive(Debug, Clone)]
pub struct TransformSettings {
    pub library_name: String,
    pub max_nesting_depth: usize,
    pub workspace_id: Option<String>,
    pub invoke_connection_id: Option<String>,
}

impl TransformSettings {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            library_name: config.transform.library_name.clone(),
            max_nesting_depth: config.transform.max_nesting_depth,
            workspace_id: config.target.workspace_id.clone(),
            invoke_connection_id: config.target.invoke_connection_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineTransformation {
    pub name: String,
    pub state: PipelineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip)]
    pub definition: Option<Value>,
    pub activities: ActivityTally,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expressions: Option<ExpressionReport>,
}

impl PipelineTransformation {
    /// Create-item request body for the transformed pipeline.
    pub fn item_payload(&self) -> Option<Value> {
        let definition = self.definition.as_ref()?;
        let mut payload = json!({
            "displayName": self.name,
            "type": "DataPipeline",
            "definition": {"pipeline-content.json": definition},
        });
        if let (Some(description), Some(map)) = (&self.description, payload.as_object_mut()) {
            map.insert("description".to_string(), Value::String(description.clone()));
        }
        Some(payload)
    }
}

pub struct PipelineTransformer<'t> {
    template: &'t ParsedTemplate,
    registry: ActivityRegistry,
    rewriter: SharedParameterRewriter,
    settings: TransformSettings,
    states: HashMap<String, PipelineState>,
}

impl<'t> PipelineTransformer<'t> {
    pub fn new(
        template: &'t ParsedTemplate,
        settings: TransformSettings,
    ) -> Result<Self, AppError> {
        Ok(Self {
            template,
            registry: ActivityRegistry::standard(),
            rewriter: SharedParameterRewriter::new(&settings.library_name)?,
            settings,
            states: HashMap::new(),
        })
    }

    pub fn with_registry(mut self, registry: ActivityRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn state(&self, name: &str) -> PipelineState {
        self.states
            .get(name)
            .copied()
            .unwrap_or(PipelineState::Unvisited)
    }

    /// Transform one pipeline. The resolution context must already contain
    /// every pipeline this one invokes.
    pub fn transform(
        &mut self,
        name: &str,
        resolver: &mut ConnectionResolver,
        context: &ResolutionContext,
        diagnostics: &mut Diagnostics,
    ) -> PipelineTransformation {
        let mut result = PipelineTransformation {
            name: name.to_string(),
            state: PipelineState::Failed,
            description: None,
            definition: None,
            activities: ActivityTally::default(),
            expressions: None,
        };

        match self.state(name) {
            PipelineState::Unvisited => {}
            state => {
                tracing::warn!(pipeline = name, ?state, "Pipeline already visited");
                result.state = state;
                return result;
            }
        }
        self.states
            .insert(name.to_string(), PipelineState::Transforming);

        let component = self.template.get(ComponentKind::Pipeline, name);
        let definition = match component.map(|c| &c.payload) {
            Some(ComponentPayload::Pipeline(definition)) => definition,
            _ => {
                diagnostics.at(
                    name,
                    MigrationIssue::UnreadableDefinition {
                        kind: ComponentKind::Pipeline.to_string(),
                        name: name.to_string(),
                        reason: "pipeline definition is missing or malformed".to_string(),
                    },
                );
                self.states.insert(name.to_string(), PipelineState::Failed);
                return result;
            }
        };
        result.description = definition.description.clone();

        let env = ActivityEnvironment {
            pipeline: name,
            template: self.template,
            resolution: context,
            workspace_id: self.settings.workspace_id.as_deref(),
            invoke_connection_id: self.settings.invoke_connection_id.as_deref(),
            max_depth: self.settings.max_nesting_depth,
        };
        let mut scope = TransformScope::new(env, &self.registry, resolver, diagnostics);
        let activities = scope.transform_activities(&definition.activities, 1);
        let tally = scope.tally();
        drop(scope);

        let activities = match activities {
            Ok(activities) => activities,
            Err(issue) => {
                diagnostics.at(name, issue);
                self.states.insert(name.to_string(), PipelineState::Failed);
                result.activities = tally;
                return result;
            }
        };

        let mut properties = Map::new();
        if let Some(description) = &definition.description {
            properties.insert("description".to_string(), Value::String(description.clone()));
        }
        properties.insert("activities".to_string(), Value::Array(activities));
        properties.insert(
            "parameters".to_string(),
            Value::Object(definition.parameters.clone()),
        );
        properties.insert(
            "variables".to_string(),
            Value::Object(definition.variables.clone()),
        );
        properties.insert(
            "annotations".to_string(),
            Value::Array(definition.annotations.clone()),
        );
        if let Some(concurrency) = definition.concurrency {
            properties.insert("concurrency".to_string(), json!(concurrency));
        }
        if let Some(folder) = &definition.folder {
            properties.insert("folder".to_string(), json!({"name": folder.name}));
        }

        let report = self.rewriter.rewrite_pipeline(
            &mut properties,
            self.template.shared_parameters(),
            name,
            diagnostics,
        );

        tracing::info!(
            pipeline = name,
            transformed = tally.transformed,
            inactive = tally.inactive,
            shared_references = report.detected(),
            "Transformed pipeline"
        );

        self.states
            .insert(name.to_string(), PipelineState::Transformed);
        result.state = PipelineState::Transformed;
        result.activities = tally;
        result.expressions = Some(report);
        result.definition = Some(json!({"name": name, "properties": properties}));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::migration::parser::parse_template;

    fn settings(depth: usize) -> TransformSettings {
        TransformSettings {
            library_name: "Globals".into(),
            max_nesting_depth: depth,
            workspace_id: Some("ws-1".into()),
            invoke_connection_id: None,
        }
    }

    fn template(activities: Value) -> ParsedTemplate {
        parse_template(&json!({
            "resources": [{
                "type": "Microsoft.DataFactory/factories/pipelines",
                "name": "[concat(parameters('factoryName'), '/Main')]",
                "properties": {"activities": activities, "folder": {"name": "etl"}}
            }]
        }))
        .unwrap()
        .template
    }

    #[test]
    fn state_machine_moves_to_transformed_once() {
        let template = template(json!([
            {"name": "Pause", "type": "Wait", "typeProperties": {"waitTimeInSeconds": 1}}
        ]));
        let mut transformer = PipelineTransformer::new(&template, settings(32)).unwrap();
        let mut resolver = ConnectionResolver::new();
        let context = ResolutionContext::default();
        let mut diagnostics = Diagnostics::new();

        assert_eq!(transformer.state("Main"), PipelineState::Unvisited);
        let result = transformer.transform("Main", &mut resolver, &context, &mut diagnostics);
        assert_eq!(result.state, PipelineState::Transformed);
        assert_eq!(transformer.state("Main"), PipelineState::Transformed);
        let definition = result.definition.as_ref().unwrap();
        assert_eq!(definition["properties"]["folder"]["name"], "etl");
        assert_eq!(definition["properties"]["activities"][0]["type"], "Wait");

        let again = transformer.transform("Main", &mut resolver, &context, &mut diagnostics);
        assert!(again.definition.is_none());
    }

    #[test]
    fn nesting_beyond_limit_fails_the_pipeline() {
        let template = template(json!([{
            "name": "Outer",
            "type": "IfCondition",
            "typeProperties": {
                "expression": {"value": "@true", "type": "Expression"},
                "ifTrueActivities": [{
                    "name": "Inner",
                    "type": "ForEach",
                    "typeProperties": {
                        "items": "@createArray(1)",
                        "activities": [{"name": "Deep", "type": "Wait", "typeProperties": {"waitTimeInSeconds": 1}}]
                    }
                }]
            }
        }]));
        let mut transformer = PipelineTransformer::new(&template, settings(2)).unwrap();
        let mut diagnostics = Diagnostics::new();
        let result = transformer.transform(
            "Main",
            &mut ConnectionResolver::new(),
            &ResolutionContext::default(),
            &mut diagnostics,
        );
        assert_eq!(result.state, PipelineState::Failed);
        assert!(diagnostics.has_code("MIG-ACT-003"));

        let mut transformer = PipelineTransformer::new(&template, settings(3)).unwrap();
        let result = transformer.transform(
            "Main",
            &mut ConnectionResolver::new(),
            &ResolutionContext::default(),
            &mut Diagnostics::new(),
        );
        assert_eq!(result.state, PipelineState::Transformed);
        assert_eq!(result.activities.transformed, 3);
    }

    #[test]
    fn unknown_activity_is_kept_inactive() {
        let template = template(json!([{
            "name": "Flow",
            "type": "ExecuteDataFlow",
            "typeProperties": {"dataflow": {"referenceName": "df1"}}
        }]));
        let mut transformer = PipelineTransformer::new(&template, settings(32)).unwrap();
        let mut diagnostics = Diagnostics::new();
        let result = transformer.transform(
            "Main",
            &mut ConnectionResolver::new(),
            &ResolutionContext::default(),
            &mut diagnostics,
        );
        let activity = &result.definition.as_ref().unwrap()["properties"]["activities"][0];
        assert_eq!(activity["type"], "ExecuteDataFlow");
        assert_eq!(activity["state"], "Inactive");
        assert_eq!(activity["onInactiveMarkAs"], "Succeeded");
        assert_eq!(activity["typeProperties"]["dataflow"]["referenceName"], "df1");
        assert_eq!(result.activities.unsupported, 1);
        assert!(diagnostics.has_code("MIG-ACT-001"));
    }
}
