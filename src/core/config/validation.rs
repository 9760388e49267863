#![allow(clippy::result_large_err)]

use super::MigrationConfig;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;

pub const MAX_CONCURRENCY: usize = 32;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration rules shared by every command
    pub fn validate(config: &MigrationConfig) -> Result<(), AppError> {
        let concurrency = config.deployment.concurrency;
        if concurrency == 0 || concurrency > MAX_CONCURRENCY {
            return Err(invalid(format!(
                "deployment.concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, concurrency
            )));
        }

        if config.deployment.retry.max_attempts == 0 {
            return Err(invalid("deployment.retry.max_attempts must be at least 1"));
        }

        if config.deployment.retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "deployment.retry.backoff_multiplier must be at least 1.0",
            ));
        }

        let library = config.transform.library_name.as_str();
        if library.is_empty()
            || !library
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(invalid(
                "transform.library_name must be a non-empty identifier (letters, digits, '_')",
            ));
        }

        if config.transform.max_nesting_depth == 0 {
            return Err(invalid("transform.max_nesting_depth must be at least 1"));
        }

        if url::Url::parse(&config.target.api_base_url).is_err() {
            return Err(invalid(format!(
                "target.api_base_url is not a valid URL: {}",
                config.target.api_base_url
            )));
        }

        Ok(())
    }

    /// Additional rules that apply when API calls will actually be issued
    pub fn validate_for_deploy(config: &MigrationConfig) -> Result<(), AppError> {
        Self::validate(config)?;
        if config.deployment.dry_run {
            return Ok(());
        }

        if config
            .target
            .workspace_id
            .as_deref()
            .map_or(true, |ws| ws.trim().is_empty())
        {
            return Err(invalid("target.workspace_id is required for deployment")
                .with_suggestion("Set [target] workspace_id or FERRY_WORKSPACE_ID"));
        }

        if config.target.access_token.is_none() {
            return Err(invalid("an access token is required for deployment")
                .with_suggestion("Export FERRY_ACCESS_TOKEN before running deploy"));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::new(ErrorCategory::ValidationError, message).with_code("MIG-CFG-010")
}
