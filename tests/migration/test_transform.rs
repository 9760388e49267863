#[path = "../common/mod.rs"]
mod common;

use ferry::core::config::MigrationConfig;
use ferry::core::migration::{MigrationReport, MigrationRun, PipelineState, PipelineTransformation};
use insta::assert_json_snapshot;
use serde_json::json;
use std::path::Path;

async fn analyze_fixture() -> MigrationReport {
    let run = MigrationRun::load(
        &common::fixture_path("arm_template.json"),
        MigrationConfig::default(),
        Path::new("."),
    )
    .unwrap();
    run.analyze().await.unwrap()
}

fn pipeline<'a>(report: &'a MigrationReport, name: &str) -> &'a PipelineTransformation {
    report
        .profile
        .pipelines
        .iter()
        .find(|p| p.name == name)
        .unwrap_or_else(|| panic!("pipeline {name} missing"))
}

#[tokio::test]
async fn test_every_pipeline_transforms() {
    let report = analyze_fixture().await;
    assert_eq!(report.profile.pipelines.len(), 5);
    for transformation in &report.profile.pipelines {
        assert_eq!(
            transformation.state,
            PipelineState::Transformed,
            "{} did not transform",
            transformation.name
        );
    }
    assert!(report.outcome.is_success());
    assert!(report.outcome.dry_run);
}

#[tokio::test]
async fn test_environment_interpolated_and_inside_function_call() {
    let report = analyze_fixture().await;
    let load_b = pipeline(&report, "LoadB");
    let expressions = load_b.expressions.as_ref().unwrap();

    assert_json_snapshot!(expressions, @r###"
    {
      "library": "MigratedGlobals",
      "bare": 0,
      "interpolated": 1,
      "function_argument": 1,
      "new_reference_count": 2,
      "remaining_legacy_count": 0,
      "parameters": [
        "Environment"
      ]
    }
    "###);

    let activities = &load_b.definition.as_ref().unwrap()["properties"]["activities"];
    assert_eq!(
        activities[1]["typeProperties"]["value"],
        json!("@concat('x', pipeline().libraryVariables.MigratedGlobals_Environment)")
    );
    assert_eq!(expressions.new_reference_count, 2);
    assert_eq!(expressions.remaining_legacy_count, 0);
    assert_eq!(
        load_b.definition.as_ref().unwrap()["properties"]["libraryVariables"]
            ["MigratedGlobals_Environment"]["variableName"],
        json!("MigratedGlobals_Environment")
    );
    assert_eq!(
        activities[2]["typeProperties"]["value"],
        json!("orders-@{pipeline().libraryVariables.MigratedGlobals_Environment}")
    );
}

#[tokio::test]
async fn test_forwarded_dataset_expression() {
    let report = analyze_fixture().await;
    let load_a = pipeline(&report, "LoadA");
    let copy = &load_a.definition.as_ref().unwrap()["properties"]["activities"][1];

    assert_eq!(copy["type"], "Copy");
    let source = &copy["typeProperties"]["source"]["datasetSettings"];
    assert_eq!(
        source["typeProperties"]["location"]["folderPath"],
        json!({"value": "@pipeline().parameters.Src", "type": "Expression"})
    );
    let connection = source["externalReferences"]["connection"].as_str().unwrap();
    assert!(connection.starts_with("dry-run-"));

    let sink_script = copy["typeProperties"]["sink"]["preCopyScript"].as_str().unwrap();
    assert!(sink_script.contains("pipeline().libraryVariables.MigratedGlobals_Environment"));
    assert!(!sink_script.contains("globalParameters"));
}

#[tokio::test]
async fn test_invocations_point_at_deployed_children() {
    let report = analyze_fixture().await;
    let master = pipeline(&report, "Master");
    let invoke = &master.definition.as_ref().unwrap()["properties"]["activities"][0];

    assert_eq!(invoke["type"], "InvokePipeline");
    let pipeline_id = invoke["typeProperties"]["pipelineId"].as_str().unwrap();
    assert!(pipeline_id.starts_with("dry-run-"));
    assert!(invoke.get("state").is_none());
    assert_eq!(report.profile.resolution.deployed_target, 4);
}

#[tokio::test]
async fn test_dependency_waves_and_schedules() {
    let report = analyze_fixture().await;
    assert_eq!(
        report.profile.dependencies.waves,
        vec![
            vec!["Common".to_string(), "Standalone".to_string()],
            vec!["LoadA".to_string(), "LoadB".to_string()],
            vec!["Master".to_string()],
        ]
    );
    assert!(report.profile.dependencies.cycle.is_none());
    assert!(report.dependency_dot().contains("digraph"));

    assert_eq!(report.profile.schedules.len(), 1);
    assert_eq!(report.profile.schedules[0].pipeline, "Master");
    assert!(report.diagnostics.has_code("MIG-TRIG-001"));
}

#[tokio::test]
async fn test_unmapped_connector_is_skipped() {
    let report = analyze_fixture().await;
    let summary = &report.profile.summary;

    assert_eq!(summary.connections_created, 2);
    assert_eq!(summary.connections_skipped, 1);
    assert!(report.diagnostics.has_code("MIG-CONN-001"));
    let mainframe = report
        .profile
        .connections
        .iter()
        .find(|plan| plan.name == "Mainframe")
        .unwrap();
    assert!(mainframe.translation.unmapped);
    assert!(mainframe.payload.is_none());

    // SalesDb only carries a connection string, which is never forwarded.
    assert!(report
        .diagnostics
        .with_code("MIG-ACT-002")
        .any(|d| d.location.as_deref() == Some("SalesDb")));
}
