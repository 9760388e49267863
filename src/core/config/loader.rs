#![allow(clippy::result_large_err)]

use super::MigrationConfig;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use serde_json::{Map, Value};
use std::env;
use std::path::{Path, PathBuf};

/// Connection payload overrides keyed by source connection name.
pub type ConnectionOverrides = Map<String, Value>;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from workspace root (workspace/ferry.toml)
    /// Environment variables override config file values
    pub fn load_from_workspace(workspace_path: &Path) -> Result<MigrationConfig, AppError> {
        let config_path = workspace_path.join("ferry.toml");
        Self::load_with_env(&config_path)
    }

    /// Load an explicit config file (defaults when missing) and apply env overrides
    pub fn load_with_env(path: &Path) -> Result<MigrationConfig, AppError> {
        let mut config = Self::load_from_file(path)?.unwrap_or_default();
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Load config from specific file path
    /// Returns Ok(None) if file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<MigrationConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
        })?;

        let config: MigrationConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                ErrorCategory::ConfigError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
            .with_code("MIG-CFG-001")
        })?;

        Ok(Some(config))
    }

    /// Read the connection override file named in the config, if any.
    /// Relative paths resolve against `base_dir`.
    pub fn load_connection_overrides(
        config: &MigrationConfig,
        base_dir: &Path,
    ) -> Result<ConnectionOverrides, AppError> {
        let Some(file) = config.connections.overrides_file.as_ref() else {
            return Ok(ConnectionOverrides::new());
        };
        let path = if file.is_absolute() {
            file.clone()
        } else {
            base_dir.join(file)
        };
        let content = std::fs::read_to_string(&path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read connection overrides {}: {}", path.display(), e),
            )
            .with_code("MIG-CFG-002")
        })?;
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(AppError::new(
                ErrorCategory::ConfigError,
                format!(
                    "Connection overrides {} must be a JSON object keyed by connection name",
                    path.display()
                ),
            )
            .with_code("MIG-CFG-003")),
        }
    }

    /// Apply environment variable overrides to the configuration
    /// Environment variables take precedence over config file values
    fn apply_env_overrides(config: &mut MigrationConfig) {
        if let Ok(url) = env::var("FERRY_API_BASE_URL") {
            config.target.api_base_url = url;
        }

        if let Ok(workspace_id) = env::var("FERRY_WORKSPACE_ID") {
            config.target.workspace_id = Some(workspace_id);
        }

        if let Ok(token) = env::var("FERRY_ACCESS_TOKEN") {
            config.target.access_token = Some(token);
        }

        if let Ok(gateway_id) = env::var("FERRY_GATEWAY_ID") {
            config.target.gateway_id = Some(gateway_id);
        }

        if let Ok(concurrency_str) = env::var("FERRY_CONCURRENCY") {
            if let Ok(concurrency) = concurrency_str.parse::<usize>() {
                config.deployment.concurrency = concurrency;
            }
        }

        if let Ok(dry_run_str) = env::var("FERRY_DRY_RUN") {
            if let Ok(dry_run) = dry_run_str.parse::<bool>() {
                config.deployment.dry_run = dry_run;
            }
        }

        if let Ok(rollback_str) = env::var("FERRY_ROLLBACK_ON_FAILURE") {
            if let Ok(rollback) = rollback_str.parse::<bool>() {
                config.deployment.rollback_on_failure = rollback;
            }
        }

        if let Ok(library_name) = env::var("FERRY_LIBRARY_NAME") {
            config.transform.library_name = library_name;
        }

        if let Ok(overrides) = env::var("FERRY_CONNECTION_OVERRIDES") {
            config.connections.overrides_file = Some(PathBuf::from(overrides));
        }
    }

    /// Get documentation for supported environment variables
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "FERRY_API_BASE_URL - Override the management API base URL",
            "FERRY_WORKSPACE_ID - Target workspace id",
            "FERRY_ACCESS_TOKEN - Bearer token used for API calls",
            "FERRY_GATEWAY_ID - Gateway id for on-premises connections",
            "FERRY_CONCURRENCY - Parallel creations per phase (1-32, default: 5)",
            "FERRY_DRY_RUN - Skip API calls (true/false)",
            "FERRY_ROLLBACK_ON_FAILURE - Roll back created resources on failure (true/false, default: true)",
            "FERRY_LIBRARY_NAME - Variable library name (default: MigratedGlobals)",
            "FERRY_CONNECTION_OVERRIDES - Path to the connection override JSON file",
        ]
    }
}
