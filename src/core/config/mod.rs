use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main ferry configuration loaded from ferry.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MigrationConfig {
    /// Target workspace and API endpoint
    #[serde(default)]
    pub target: TargetConfig,

    /// Deployment behaviour
    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// Transformation settings
    #[serde(default)]
    pub transform: TransformConfig,

    /// Explicit connection mappings and overrides
    #[serde(default)]
    pub connections: ConnectionsConfig,
}

/// Target workspace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Base URL of the management API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Workspace receiving the migrated items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,

    /// Bearer token; normally supplied through FERRY_ACCESS_TOKEN
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,

    /// Gateway used for connections that need one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_id: Option<String>,

    /// Connection id used by InvokePipeline activities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoke_connection_id: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

/// Deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Maximum number of creations in flight within one phase
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Run every stage except the API calls
    #[serde(default)]
    pub dry_run: bool,

    /// Delete created resources when an unrecoverable failure occurs
    #[serde(default = "default_rollback_on_failure")]
    pub rollback_on_failure: bool,

    /// Directory receiving deployment logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Retry policy for transient API failures
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

/// Transformation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Name of the variable library holding migrated shared parameters
    #[serde(default = "default_library_name")]
    pub library_name: String,

    /// Maximum depth of nested control-flow activities
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,
}

/// Connection mapping configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectionsConfig {
    /// JSON file of payload overrides keyed by source connection name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides_file: Option<PathBuf>,

    /// Source connection name to existing target connection id
    #[serde(default)]
    pub map: BTreeMap<String, String>,

    /// Explicit ids for individual activity slots
    #[serde(default, rename = "reference")]
    pub references: Vec<ReferenceMapping>,
}

/// One explicit `(pipeline, activity, location)` → connection id mapping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceMapping {
    pub pipeline: String,
    pub activity: String,
    pub location: String,
    pub connection_id: String,
}

// Default functions
fn default_api_base_url() -> String {
    "https://api.fabric.microsoft.com".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    60
}

fn default_concurrency() -> usize {
    5
}

fn default_rollback_on_failure() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".ferry/deployments")
}

fn default_max_attempts() -> u32 {
    4
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_library_name() -> String {
    "MigratedGlobals".to_string()
}

fn default_max_nesting_depth() -> usize {
    32
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            api_base_url: default_api_base_url(),
            workspace_id: None,
            access_token: None,
            gateway_id: None,
            invoke_connection_id: None,
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        DeploymentConfig {
            concurrency: default_concurrency(),
            dry_run: false,
            rollback_on_failure: default_rollback_on_failure(),
            log_dir: default_log_dir(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        TransformConfig {
            library_name: default_library_name(),
            max_nesting_depth: default_max_nesting_depth(),
        }
    }
}


pub mod loader;
pub mod validation;

pub use loader::ConfigLoader;
pub use validation::ConfigValidator;
