use ferry::core::config::{ConfigLoader, ConfigValidator};
use ferry::core::migration::MigrationRun;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

fn clear_ferry_env() {
    for v in &[
        "FERRY_API_BASE_URL",
        "FERRY_WORKSPACE_ID",
        "FERRY_ACCESS_TOKEN",
        "FERRY_GATEWAY_ID",
        "FERRY_CONCURRENCY",
        "FERRY_DRY_RUN",
        "FERRY_ROLLBACK_ON_FAILURE",
        "FERRY_LIBRARY_NAME",
        "FERRY_CONNECTION_OVERRIDES",
    ] {
        env::remove_var(v);
    }
}

/// Test integration of config loading with environment variables
#[test]
#[serial]
fn test_config_loading_integration() {
    clear_ferry_env();
    let temp_dir = TempDir::new().unwrap();
    let workspace_path = temp_dir.path();

    let config_content = r#"
[target]
workspace_id = "ws-from-file"
gateway_id = "gw-1"

[deployment]
concurrency = 8
rollback_on_failure = false
log_dir = "logs/deploy"

[deployment.retry]
max_attempts = 2

[transform]
library_name = "SharedGlobals"

[connections.map]
SalesDb = "existing-conn-1"

[[connections.reference]]
pipeline = "LoadA"
activity = "CopyOrders"
location = "source"
connection_id = "explicit-conn"
"#;
    fs::write(workspace_path.join("ferry.toml"), config_content).unwrap();

    let config = ConfigLoader::load_from_workspace(workspace_path).unwrap();
    assert_eq!(config.target.workspace_id.as_deref(), Some("ws-from-file"));
    assert_eq!(config.target.gateway_id.as_deref(), Some("gw-1"));
    assert_eq!(config.deployment.concurrency, 8);
    assert!(!config.deployment.rollback_on_failure);
    assert_eq!(config.deployment.retry.max_attempts, 2);
    assert_eq!(config.deployment.retry.backoff_ms, 500);
    assert_eq!(config.transform.library_name, "SharedGlobals");
    assert_eq!(config.connections.map["SalesDb"], "existing-conn-1");
    assert_eq!(config.connections.references.len(), 1);
    assert_eq!(config.connections.references[0].connection_id, "explicit-conn");
    ConfigValidator::validate(&config).unwrap();

    env::set_var("FERRY_CONCURRENCY", "3");
    env::set_var("FERRY_LIBRARY_NAME", "EnvGlobals");
    env::set_var("FERRY_ACCESS_TOKEN", "token-from-env");
    let config = ConfigLoader::load_from_workspace(workspace_path).unwrap();
    assert_eq!(config.deployment.concurrency, 3);
    assert_eq!(config.transform.library_name, "EnvGlobals");
    assert_eq!(config.target.access_token.as_deref(), Some("token-from-env"));
    assert_eq!(config.target.workspace_id.as_deref(), Some("ws-from-file"));
    ConfigValidator::validate_for_deploy(&config).unwrap();

    clear_ferry_env();
}

#[test]
#[serial]
fn test_missing_config_uses_defaults() {
    clear_ferry_env();
    let temp_dir = TempDir::new().unwrap();

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    assert_eq!(config.deployment.concurrency, 5);
    assert!(config.deployment.rollback_on_failure);
    assert!(!config.deployment.dry_run);
    assert_eq!(config.transform.library_name, "MigratedGlobals");
    assert!(config.target.workspace_id.is_none());

    let err = ConfigValidator::validate_for_deploy(&config).unwrap_err();
    assert_eq!(err.code, "MIG-CFG-010");
}

#[test]
#[serial]
fn test_malformed_config_is_reported() {
    clear_ferry_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("ferry.toml"), "[deployment\nconcurrency = ").unwrap();

    let err = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap_err();
    assert_eq!(err.code, "MIG-CFG-001");
}

#[test]
#[serial]
fn test_connection_overrides_resolve_against_workspace() {
    clear_ferry_env();
    let temp_dir = TempDir::new().unwrap();
    let workspace_path = temp_dir.path();
    fs::write(
        workspace_path.join("overrides.json"),
        r#"{"Mainframe": {"connectionDetails": {"type": "Odbc", "parameters": [{"name": "dsn", "value": "MF01"}]}}}"#,
    )
    .unwrap();
    fs::write(
        workspace_path.join("ferry.toml"),
        "[connections]\noverrides_file = \"overrides.json\"\n",
    )
    .unwrap();

    let config = ConfigLoader::load_from_workspace(workspace_path).unwrap();
    let overrides = ConfigLoader::load_connection_overrides(&config, workspace_path).unwrap();
    assert!(overrides.contains_key("Mainframe"));

    fs::write(workspace_path.join("overrides.json"), "[1, 2]").unwrap();
    let err = ConfigLoader::load_connection_overrides(&config, workspace_path).unwrap_err();
    assert_eq!(err.code, "MIG-CFG-003");
}

#[tokio::test]
#[serial]
async fn test_override_turns_unmapped_connector_into_creation() {
    clear_ferry_env();
    let temp_dir = TempDir::new().unwrap();
    let workspace_path = temp_dir.path();
    fs::write(
        workspace_path.join("overrides.json"),
        r#"{"Mainframe": {"connectionDetails": {"type": "Odbc"}}}"#,
    )
    .unwrap();
    fs::write(
        workspace_path.join("ferry.toml"),
        "[connections]\noverrides_file = \"overrides.json\"\n\n[connections.map]\nSalesDb = \"existing-sales\"\n",
    )
    .unwrap();

    let config = ConfigLoader::load_from_workspace(workspace_path).unwrap();
    let template = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("arm_template.json");
    let run = MigrationRun::load(&template, config, workspace_path).unwrap();
    let report = run.analyze().await.unwrap();

    let summary = &report.profile.summary;
    assert_eq!(summary.connections_created, 2);
    assert_eq!(summary.connections_existing, 1);
    assert_eq!(summary.connections_skipped, 0);
}
