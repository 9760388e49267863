#[path = "../common/mod.rs"]
mod common;

use ferry::core::migration::parser::resolve_name_expression;
use ferry::core::migration::{parse_template, ComponentKind, NamingConvention};
use serde_json::json;

#[test]
fn test_fixture_component_counts() {
    let outcome = parse_template(&common::fixture_json("arm_template.json")).unwrap();
    let counts = outcome.template.counts();

    assert_eq!(counts[&ComponentKind::Pipeline], 5);
    assert_eq!(counts[&ComponentKind::Dataset], 2);
    assert_eq!(counts[&ComponentKind::Connection], 3);
    assert_eq!(counts[&ComponentKind::Trigger], 2);
    assert_eq!(outcome.template.shared_parameters().len(), 2);
    assert_eq!(
        outcome.template.pipeline_names(),
        vec!["Common", "LoadA", "LoadB", "Master", "Standalone"]
    );
}

#[test]
fn test_fixture_uses_legacy_value_alias() {
    let outcome = parse_template(&common::fixture_json("arm_template.json")).unwrap();
    let env = outcome.template.shared_parameter("Environment").unwrap();
    assert_eq!(env.default_value, json!("dev"));
    assert!(outcome.diagnostics.has_code("MIG-PARSE-006"));
}

#[test]
fn test_both_naming_conventions_in_one_document() {
    let template = common::template_from(json!({
        "resources": [
            {
                "type": "Microsoft.DataFactory/factories/pipelines",
                "name": "[concat(parameters('factoryName'), '/FromFactory')]",
                "properties": {"activities": []}
            },
            {
                "type": "Microsoft.Synapse/workspaces/pipelines",
                "name": "[concat(parameters('workspaceName'), '/FromSynapse')]",
                "properties": {"activities": []}
            }
        ]
    }));

    let conventions = template.convention_counts();
    assert_eq!(conventions[&NamingConvention::DataFactory], 1);
    assert_eq!(conventions[&NamingConvention::Synapse], 1);
    assert!(template.pipeline("FromFactory").is_some());
    assert!(template.pipeline("FromSynapse").is_some());
}

#[test]
fn test_resolved_names_are_fixed_points() {
    for raw in [
        "[concat(parameters('factoryName'), '/LoadA')]",
        "[concat(variables('factoryId'), '/pipelines/Master')]",
        "[concat(parameters('workspaceName'), '/Ingest Daily')]",
        "contoso-adf/Plain",
    ] {
        let first = resolve_name_expression(raw).unwrap();
        let second = resolve_name_expression(&first.leaf).unwrap();
        assert_eq!(first.leaf, second.leaf, "leaf of {raw} should be stable");
    }
}

#[test]
fn test_duplicate_component_is_reported_once() {
    let outcome = parse_template(&json!({
        "resources": [
            {"type": "Microsoft.DataFactory/factories/pipelines", "name": "f/Twice", "properties": {"activities": []}},
            {"type": "Microsoft.DataFactory/factories/pipelines", "name": "f/Twice", "properties": {"activities": []}}
        ]
    }))
    .unwrap();
    assert_eq!(outcome.template.pipeline_names(), vec!["Twice"]);
    assert_eq!(outcome.diagnostics.with_code("MIG-PARSE-003").count(), 1);
}

#[test]
fn test_unknown_resource_type_is_skipped() {
    let outcome = parse_template(&json!({
        "resources": [
            {"type": "Microsoft.DataFactory/factories/managedVirtualNetworks", "name": "f/default", "properties": {}}
        ]
    }))
    .unwrap();
    assert!(outcome.template.components().is_empty());
    assert!(outcome.diagnostics.has_code("MIG-PARSE-004"));
}
