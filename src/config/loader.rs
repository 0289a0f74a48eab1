//! Configuration Loader
//!
//! Environment-aware layered loading on top of the `config` crate:
//!
//! ```text
//! defaults (serde) < orchestrator.toml < orchestrator.<env>.toml < ORCHESTRATOR__SECTION__KEY
//! ```
//!
//! Both files are optional. The merged result is validated before it is handed out.

use config::{Config, Environment, File};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::OrchestratorConfig;
use crate::constants::{self, CONFIG_FILE_STEM, DEFAULT_CONFIG_DIRECTORY, DEFAULT_ENVIRONMENT};

/// Loaded, validated configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Overrides are read from the process environment.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);
        Self::load_layers(config_directory, environment, None)
    }

    /// Load configuration with an explicit override map instead of the process
    /// environment. Keys use the `ORCHESTRATOR__SECTION__KEY` form.
    pub fn load_with_overrides(
        config_dir: impl Into<PathBuf>,
        environment: &str,
        overrides: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_layers(config_dir.into(), environment, Some(overrides))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(
        config: OrchestratorConfig,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        }))
    }

    fn load_layers(
        config_directory: PathBuf,
        environment: &str,
        overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let base_file = Self::config_file(&config_directory, None);
        let env_file = Self::config_file(&config_directory, Some(environment));

        let mut env_source = Environment::with_prefix(constants::env::OVERRIDE_PREFIX)
            .prefix_separator(constants::env::OVERRIDE_SEPARATOR)
            .separator(constants::env::OVERRIDE_SEPARATOR)
            .try_parsing(true);
        if let Some(overrides) = overrides {
            env_source = env_source.source(Some(overrides.into_iter().collect()));
        }

        let config: OrchestratorConfig = Config::builder()
            .add_source(File::from(base_file.clone()).required(false))
            .add_source(File::from(env_file.clone()).required(false))
            .add_source(env_source)
            .build()
            .and_then(|merged| merged.try_deserialize())
            .map_err(|e| ConfigurationError::load(config_directory.display().to_string(), e))?;

        config.validate()?;

        info!(
            environment = %environment,
            base_file_present = base_file.is_file(),
            environment_file_present = env_file.is_file(),
            reconcile_strategy = ?config.pool.reconcile_strategy,
            trigger_activity_type = %config.discovery.trigger_activity_type,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
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

    /// JSON view of the configuration for logging and diagnostics
    pub fn debug_config(&self) -> serde_json::Value {
        serde_json::json!({
            "environment": self.environment,
            "config_directory": self.config_directory.display().to_string(),
            "config": self.config,
        })
    }

    /// Detect the current environment from environment variables
    pub fn detect_environment() -> String {
        env::var(constants::env::ORCHESTRATOR_ENV)
            .or_else(|_| env::var(constants::env::APP_ENV))
            .unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var(constants::env::CONFIG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIRECTORY))
    }

    fn config_file(directory: &Path, environment: Option<&str>) -> PathBuf {
        match environment {
            Some(environment) => directory.join(format!("{CONFIG_FILE_STEM}.{environment}.toml")),
            None => directory.join(format!("{CONFIG_FILE_STEM}.toml")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContentionPolicy, EmptyKeyPolicy, ReconcileStrategy};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_files_yield_defaults() {
        let dir = TempDir::new().unwrap();
        let manager =
            ConfigManager::load_with_overrides(dir.path(), "test", HashMap::new()).unwrap();

        assert_eq!(manager.config(), &OrchestratorConfig::default());
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_environment_file_overrides_base_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("orchestrator.toml"),
            r#"
[pool]
reconcile_strategy = "incremental"
contention_policy = "reject"

[discovery]
trigger_activity_type = "TopicMessageReceived"
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("orchestrator.production.toml"),
            r#"
[pool]
contention_policy = "wait"
"#,
        )
        .unwrap();

        let manager =
            ConfigManager::load_with_overrides(dir.path(), "production", HashMap::new()).unwrap();
        let config = manager.config();

        assert_eq!(config.pool.reconcile_strategy, ReconcileStrategy::Incremental);
        assert_eq!(config.pool.contention_policy, ContentionPolicy::Wait);
        assert_eq!(config.discovery.trigger_activity_type, "TopicMessageReceived");
        // Untouched fields keep their defaults
        assert_eq!(config.discovery.topic_property, "TopicName");
    }

    #[test]
    fn test_override_map_wins() {
        let dir = TempDir::new().unwrap();
        let overrides = HashMap::from([
            (
                "ORCHESTRATOR__DISCOVERY__EMPTY_KEY_POLICY".to_string(),
                "reject".to_string(),
            ),
            (
                "ORCHESTRATOR__SERVICE__TERMINATION_POLL_INTERVAL_MS".to_string(),
                "250".to_string(),
            ),
        ]);

        let manager = ConfigManager::load_with_overrides(dir.path(), "test", overrides).unwrap();

        assert_eq!(
            manager.config().discovery.empty_key_policy,
            EmptyKeyPolicy::Reject
        );
        assert_eq!(manager.config().service.termination_poll_interval_ms, 250);
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("orchestrator.toml"),
            "[service]\ntermination_poll_interval_ms = 0\n",
        )
        .unwrap();

        let err = ConfigManager::load_with_overrides(dir.path(), "test", HashMap::new())
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_debug_config_includes_environment() {
        let manager = ConfigManager::from_config(OrchestratorConfig::default(), "staging").unwrap();
        let view = manager.debug_config();
        assert_eq!(view["environment"], "staging");
        assert_eq!(view["config"]["pool"]["reconcile_strategy"], "full_rebuild");
    }
}
