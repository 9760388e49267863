use assert_cmd::Command;
use ferry::core::deploy::{DeploymentLog, DeploymentRecord};
use ferry::core::types::ResourceKind;
use predicates::prelude::*;
use serde_json::Value;
use std::path::PathBuf;
use tempfile::TempDir;

const BIN: &str = "ferry";

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("arm_template.json")
}

fn ferry(workspace: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin(BIN).expect("binary should build");
    cmd.current_dir(workspace.path())
        .env_remove("FERRY_ACCESS_TOKEN")
        .env_remove("FERRY_WORKSPACE_ID")
        .env_remove("FERRY_DRY_RUN")
        .env("FERRY_LOG_CONSOLE", "none");
    cmd
}

#[test]
fn test_help_lists_migration_commands() {
    let workspace = TempDir::new().unwrap();
    ferry(&workspace)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("MIGRATION COMMANDS"))
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("rollback"));
}

#[test]
fn test_analyze_prints_profile_json() {
    let workspace = TempDir::new().unwrap();
    let output = ferry(&workspace)
        .arg("analyze")
        .arg(fixture())
        .arg("-w")
        .arg(workspace.path())
        .output()
        .expect("should run successfully");

    assert!(output.status.success());
    let profile: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(profile["summary"]["pipelines_transformed"], 5);
    assert_eq!(profile["dependencies"]["waves"][2][0], "Master");
    assert_eq!(profile["source"]["sha256"].as_str().unwrap().len(), 64);
}

#[test]
fn test_analyze_writes_profile_and_graph() {
    let workspace = TempDir::new().unwrap();
    let profile = workspace.path().join("profile.json");
    let dot = workspace.path().join("graph.dot");

    ferry(&workspace)
        .arg("analyze")
        .arg(fixture())
        .arg("-w")
        .arg(workspace.path())
        .arg("--output")
        .arg(&profile)
        .arg("--dot")
        .arg(&dot)
        .assert()
        .success()
        .stdout(predicate::str::contains("Profile written to"));

    assert!(profile.exists());
    let graph = std::fs::read_to_string(dot).unwrap();
    assert!(graph.contains("digraph"));
    assert!(graph.contains("Master"));
}

#[test]
fn test_transform_writes_definitions() {
    let workspace = TempDir::new().unwrap();
    let out = workspace.path().join("fabric");

    ferry(&workspace)
        .arg("transform")
        .arg(fixture())
        .arg("-w")
        .arg(workspace.path())
        .arg("--out")
        .arg(&out)
        .assert()
        .success();

    let master_path = out.join("pipelines").join("Master.json");
    let master: Value =
        serde_json::from_str(&std::fs::read_to_string(master_path).unwrap()).unwrap();
    assert_eq!(master["type"], "DataPipeline");
    assert_eq!(
        master["definition"]["pipeline-content.json"]["properties"]["activities"][0]["type"],
        "InvokePipeline"
    );
    assert!(out.join("connections").join("Lake.json").exists());
    assert!(out.join("variable-library.json").exists());
    assert!(out.join("schedules.json").exists());
    assert!(out.join("graph.dot").exists());
}

#[test]
fn test_dry_run_deploy_succeeds_without_credentials() {
    let workspace = TempDir::new().unwrap();
    ferry(&workspace)
        .arg("deploy")
        .arg(fixture())
        .arg("-w")
        .arg(workspace.path())
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Elapsed"));

    assert!(!workspace.path().join(".ferry").join("deployments").exists());
}

#[test]
fn test_deploy_without_credentials_fails() {
    let workspace = TempDir::new().unwrap();
    ferry(&workspace)
        .arg("deploy")
        .arg(fixture())
        .arg("-w")
        .arg(workspace.path())
        .assert()
        .failure();
}

#[test]
fn test_missing_template_fails() {
    let workspace = TempDir::new().unwrap();
    ferry(&workspace)
        .arg("analyze")
        .arg(workspace.path().join("nope.json"))
        .arg("-w")
        .arg(workspace.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.json"));
}

#[test]
fn test_rollback_replays_dry_run_log() {
    let workspace = TempDir::new().unwrap();
    let mut log = DeploymentLog::new(true);
    log.append(DeploymentRecord::new(ResourceKind::Connection, "Lake", "dry-run-1"));
    log.append(DeploymentRecord::new(ResourceKind::Pipeline, "Common", "dry-run-2"));
    let path = log.default_path(workspace.path());
    log.save(&path).unwrap();

    ferry(&workspace)
        .arg("rollback")
        .arg(&path)
        .arg("-w")
        .arg(workspace.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted 2 of 2 resources"));
}
