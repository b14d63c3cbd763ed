//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered, later ones
//! winning:
//!
//! 1. `<dir>/orchestrator.toml`
//! 2. `<dir>/orchestrator.<environment>.toml`
//! 3. `RUNBOOK__<SECTION>__<FIELD>` environment variables
//!
//! Every source is optional; missing files fall back to the built-in defaults.

use super::error::{ConfigResult, ConfigurationError};
use super::OrchestratorConfig;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "orchestrator";
const ENV_PREFIX: &str = "RUNBOOK";
const ENV_SEPARATOR: &str = "__";

/// Loaded configuration together with where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration from a directory with the environment auto-detected
    pub fn load_from_directory(config_dir: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a directory with an explicit environment
    pub fn load_from_directory_with_env(
        config_dir: impl AsRef<Path>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(config_dir.as_ref(), environment, None)
    }

    /// Load configuration with environment overrides supplied directly
    ///
    /// Keys use the same `RUNBOOK__SECTION__FIELD` form as process variables.
    /// Useful for testing without modifying the process environment.
    pub fn load_with_overrides(
        config_dir: impl AsRef<Path>,
        environment: &str,
        overrides: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(config_dir.as_ref(), environment, Some(overrides))
    }

    /// Wrap an already-built configuration
    pub fn from_config(config: OrchestratorConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: PathBuf::from("config"),
        }))
    }

    fn build(
        config_directory: &Path,
        environment: &str,
        env_source: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        if config_directory.exists() && !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory.to_path_buf(),
            });
        }

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading orchestrator configuration"
        );

        let base_path = config_directory.join(format!("{BASE_FILE_STEM}.toml"));
        let env_path = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        let env_overrides = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(env_source);

        let settings = Config::builder()
            .add_source(File::from(base_path.clone()).format(FileFormat::Toml).required(false))
            .add_source(File::from(env_path.clone()).format(FileFormat::Toml).required(false))
            .add_source(env_overrides)
            .build()
            .map_err(|e| {
                ConfigurationError::load_error(
                    format!("{} / {}", base_path.display(), env_path.display()),
                    e,
                )
            })?;

        let config: OrchestratorConfig = settings.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %environment,
            max_concurrent_steps = config.execution.max_concurrent_steps,
            step_timeout_seconds = config.execution.step_timeout_seconds,
            state_directory = %config.persistence.state_directory.display(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: config_directory.to_path_buf(),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect the current environment, defaulting to development
    pub fn detect_environment() -> String {
        env::var("RUNBOOK_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}
