#[path = "../common/mod.rs"]
mod common;

use ferry::core::migration::{
    ConnectionResolver, Diagnostics, ParsedTemplate, PipelineState, PipelineTransformation,
    PipelineTransformer, ResolutionContext, TransformSettings,
};
use serde_json::{json, Value};

fn template(activities: Value) -> ParsedTemplate {
    common::template_from(json!({
        "resources": [
            {
                "type": "Microsoft.DataFactory/factories/linkedServices",
                "name": "[concat(parameters('factoryName'), '/SalesDb')]",
                "properties": {"type": "AzureSqlDatabase", "typeProperties": {"server": "contoso"}}
            },
            {
                "type": "Microsoft.DataFactory/factories/datasets",
                "name": "[concat(parameters('factoryName'), '/SalesTable')]",
                "properties": {
                    "type": "AzureSqlTable",
                    "linkedServiceName": {"referenceName": "SalesDb", "type": "LinkedServiceReference"},
                    "typeProperties": {"schema": "dbo", "table": "Orders"}
                }
            },
            {
                "type": "Microsoft.DataFactory/factories/pipelines",
                "name": "[concat(parameters('factoryName'), '/Main')]",
                "properties": {"activities": activities}
            }
        ]
    }))
}

fn transform(
    template: &ParsedTemplate,
    context: &ResolutionContext,
) -> (PipelineTransformation, Diagnostics) {
    let settings = TransformSettings {
        library_name: "MigratedGlobals".into(),
        max_nesting_depth: 32,
        workspace_id: Some("ws-1".into()),
        invoke_connection_id: None,
    };
    let mut transformer = PipelineTransformer::new(template, settings).unwrap();
    let mut resolver = ConnectionResolver::new();
    let mut diagnostics = Diagnostics::new();
    let result = transformer.transform("Main", &mut resolver, context, &mut diagnostics);
    (result, diagnostics)
}

fn connected() -> ResolutionContext {
    let mut context = ResolutionContext::default();
    context.register_connection("SalesDb", "conn-1");
    context
}

fn activities(result: &PipelineTransformation) -> &Value {
    &result.definition.as_ref().unwrap()["properties"]["activities"]
}

#[test]
fn test_script_activity_gets_external_connection() {
    let template = template(json!([{
        "name": "Truncate",
        "type": "Script",
        "linkedServiceName": {"referenceName": "SalesDb", "type": "LinkedServiceReference"},
        "typeProperties": {"scripts": [{"type": "NonQuery", "text": "TRUNCATE TABLE dbo.Orders"}]}
    }]));
    let (result, diagnostics) = transform(&template, &connected());

    assert_eq!(result.state, PipelineState::Transformed);
    let script = &activities(&result)[0];
    assert_eq!(script["externalReferences"]["connection"], "conn-1");
    assert!(script.get("linkedServiceName").is_none());
    assert!(script.get("state").is_none());
    assert!(diagnostics.is_empty());
}

#[test]
fn test_unresolved_connection_deactivates_activity() {
    let template = template(json!([{
        "name": "Truncate",
        "type": "Script",
        "linkedServiceName": {"referenceName": "SalesDb", "type": "LinkedServiceReference"},
        "typeProperties": {"scripts": []}
    }]));
    let (result, diagnostics) = transform(&template, &ResolutionContext::default());

    assert_eq!(result.state, PipelineState::Transformed);
    assert_eq!(activities(&result)[0]["state"], "Inactive");
    assert_eq!(result.activities.inactive, 1);
    assert!(diagnostics.has_code("MIG-RES-001"));
}

#[test]
fn test_unknown_activity_is_kept_inactive() {
    let template = template(json!([{
        "name": "Flow",
        "type": "ExecuteDataFlow",
        "typeProperties": {"dataflow": {"referenceName": "Cleanse"}}
    }]));
    let (result, diagnostics) = transform(&template, &connected());

    let flow = &activities(&result)[0];
    assert_eq!(flow["type"], "ExecuteDataFlow");
    assert_eq!(flow["state"], "Inactive");
    assert_eq!(flow["onInactiveMarkAs"], "Succeeded");
    assert_eq!(result.activities.unsupported, 1);
    assert!(diagnostics.has_code("MIG-ACT-001"));
}

#[test]
fn test_web_activity_drops_attachments() {
    let template = template(json!([{
        "name": "Notify",
        "type": "WebActivity",
        "typeProperties": {
            "url": "https://hooks.example.com/done",
            "method": "POST",
            "datasets": [{"referenceName": "SalesTable"}]
        }
    }]));
    let (result, diagnostics) = transform(&template, &connected());

    let web = &activities(&result)[0];
    assert_eq!(web["typeProperties"]["url"], "https://hooks.example.com/done");
    assert!(web["typeProperties"].get("datasets").is_none());
    assert!(diagnostics.has_code("MIG-ACT-002"));
}

#[test]
fn test_nested_lookup_embeds_dataset() {
    let template = template(json!([{
        "name": "EachTable",
        "type": "ForEach",
        "typeProperties": {
            "items": {"value": "@pipeline().parameters.tables", "type": "Expression"},
            "activities": [{
                "name": "ReadRow",
                "type": "Lookup",
                "typeProperties": {
                    "source": {"type": "AzureSqlSource"},
                    "dataset": {"referenceName": "SalesTable", "type": "DatasetReference"}
                }
            }]
        }
    }]));
    let (result, _) = transform(&template, &connected());

    let lookup = &activities(&result)[0]["typeProperties"]["activities"][0];
    assert_eq!(lookup["type"], "Lookup");
    let settings = &lookup["typeProperties"]["datasetSettings"];
    assert_eq!(settings["externalReferences"]["connection"], "conn-1");
    assert_eq!(settings["typeProperties"]["table"], "Orders");
    assert!(lookup["typeProperties"].get("dataset").is_none());
    assert_eq!(result.activities.transformed, 2);
}

#[test]
fn test_excessive_nesting_fails_the_pipeline() {
    let mut inner = json!({
        "name": "Leaf",
        "type": "Wait",
        "typeProperties": {"waitTimeInSeconds": 1}
    });
    for depth in 0..34 {
        inner = json!({
            "name": format!("Level{}", depth),
            "type": "ForEach",
            "typeProperties": {"items": "@createArray(1)", "activities": [inner]}
        });
    }
    let template = template(json!([inner]));
    let (result, diagnostics) = transform(&template, &connected());

    assert_eq!(result.state, PipelineState::Failed);
    assert!(result.definition.is_none());
    assert!(diagnostics.has_code("MIG-ACT-003"));
}
