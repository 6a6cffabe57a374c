//! Configuration Loader
//!
//! Environment-aware loading on top of the `config` crate. Sources are layered
//! lowest precedence first:
//!
//! 1. built-in defaults ([`StepflowConfig::default`])
//! 2. `{config_dir}/stepflow.toml`
//! 3. `{config_dir}/stepflow.{environment}.toml`
//! 4. `STEPFLOW__SECTION__FIELD` environment variables
//!
//! Missing files are skipped, so an empty directory yields the defaults.

use super::error::{ConfigResult, ConfigurationError};
use super::StepflowConfig;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const ENV_PREFIX: &str = "STEPFLOW";
const ENV_SEPARATOR: &str = "__";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: StepflowConfig,
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
    /// Useful for tests that must not touch process-wide environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_sources(config_dir, environment, None)
    }

    /// Load with an explicit environment-variable map in place of the process
    /// environment
    pub fn load_with_env_vars(
        config_dir: Option<PathBuf>,
        environment: &str,
        vars: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_sources(config_dir, environment, Some(vars))
    }

    fn load_with_sources(
        config_dir: Option<PathBuf>,
        environment: &str,
        vars: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);
        let environment = environment.to_lowercase();

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::build_config(&config_directory, &environment, vars)?;
        config.validate()?;

        let sanitized_config = Self::sanitize_config_for_logging(&config);
        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&sanitized_config)
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_directory,
        }))
    }

    fn build_config(
        config_directory: &Path,
        environment: &str,
        vars: Option<HashMap<String, String>>,
    ) -> ConfigResult<StepflowConfig> {
        let defaults = config::Config::try_from(&StepflowConfig::default())
            .map_err(|e| ConfigurationError::load_error(environment, e))?;

        let mut env_source = config::Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true);
        if vars.is_some() {
            env_source = env_source.source(vars);
        }

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(config_directory.join("stepflow.toml")).required(false),
            )
            .add_source(
                config::File::from(config_directory.join(format!("stepflow.{environment}.toml")))
                    .required(false),
            )
            .add_source(env_source)
            .build()
            .map_err(|e| ConfigurationError::load_error(environment, e))?;

        settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::load_error(environment, e))
    }

    pub fn config(&self) -> &StepflowConfig {
        &self.config
    }

    /// Sanitized configuration for diagnostics endpoints and logs
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Mask signing keys and other secrets before the config reaches a log line
    fn sanitize_config_for_logging(config: &StepflowConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        let sensitive_patterns = ["password", "secret", "signing_key", "api_key", "credential"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if !is_sensitive {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                        continue;
                    }

                    *val = match val {
                        serde_json::Value::Null => serde_json::Value::Null,
                        serde_json::Value::String(s) if s.is_empty() => {
                            serde_json::Value::String("[EMPTY]".to_string())
                        }
                        serde_json::Value::String(s) if s.chars().count() > 4 => {
                            let chars: Vec<char> = s.chars().collect();
                            let head: String = chars[..2].iter().collect();
                            let tail: String = chars[chars.len() - 2..].iter().collect();
                            serde_json::Value::String(format!("[MASKED: {head}***{tail}]"))
                        }
                        _ => serde_json::Value::String("[MASKED]".to_string()),
                    };
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }

    /// Detect current environment: `STEPFLOW_ENV`, then `APP_ENV`, then `development`
    pub fn detect_environment() -> String {
        env::var("STEPFLOW_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// `STEPFLOW_CONFIG_DIR` if set, otherwise `./config`
    fn default_config_directory() -> PathBuf {
        env::var("STEPFLOW_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const BASE_CONFIG: &str = r#"
[engine]
health_check_timeout_ms = 2000

[[providers]]
name = "primary"
type = "memory"
default = true

[[providers]]
name = "durable"
type = "queue"
key_prefix = "orders"

[retry]
max_attempts = 4
strategy = "fixed"
base_delay_ms = 250

[circuit_breakers.component_configs.payments]
failure_threshold = 2
cool_down_ms = 10000

[webhook]
current_signing_key = "whsec_current_value"
"#;

    fn setup_test_config_dir() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("stepflow.toml"), BASE_CONFIG).unwrap();
        fs::write(
            temp_dir.path().join("stepflow.test.toml"),
            "[retry]\nmax_attempts = 2\n",
        )
        .unwrap();
        temp_dir
    }

    #[test]
    fn test_empty_directory_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::load_with_env_vars(
            Some(temp_dir.path().to_path_buf()),
            "development",
            HashMap::new(),
        )
        .unwrap();

        assert_eq!(manager.config(), &StepflowConfig::default());
        assert_eq!(manager.environment(), "development");
    }

    #[test]
    fn test_base_file_is_loaded() {
        let temp_dir = setup_test_config_dir();
        let manager = ConfigManager::load_with_env_vars(
            Some(temp_dir.path().to_path_buf()),
            "development",
            HashMap::new(),
        )
        .unwrap();
        let config = manager.config();

        assert_eq!(config.engine.health_check_timeout_ms, 2000);
        assert_eq!(config.engine.event_channel_capacity, 1000);
        assert_eq!(config.providers.len(), 2);
        assert!(config.providers[0].default);
        assert_eq!(config.providers[1].key_prefix, "orders");
        assert_eq!(config.providers[1].queue_name, "stepflow_steps");
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(
            config
                .circuit_breakers
                .config_for_component("payments")
                .failure_threshold,
            2
        );
    }

    #[test]
    fn test_environment_overlay_wins_over_base() {
        let temp_dir = setup_test_config_dir();
        let manager = ConfigManager::load_with_env_vars(
            Some(temp_dir.path().to_path_buf()),
            "TEST",
            HashMap::new(),
        )
        .unwrap();

        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().retry.max_attempts, 2);
        assert_eq!(manager.config().retry.base_delay_ms, 250);
    }

    #[test]
    fn test_environment_variables_win_over_files() {
        let temp_dir = setup_test_config_dir();
        let vars = HashMap::from([
            (
                "STEPFLOW__ENGINE__HEALTH_CHECK_TIMEOUT_MS".to_string(),
                "750".to_string(),
            ),
            ("STEPFLOW__RATE_LIMIT__ENABLED".to_string(), "true".to_string()),
        ]);
        let manager =
            ConfigManager::load_with_env_vars(Some(temp_dir.path().to_path_buf()), "test", vars)
                .unwrap();

        assert_eq!(manager.config().engine.health_check_timeout_ms, 750);
        assert!(manager.config().rate_limit.enabled);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("stepflow.toml"),
            "[retry]\nmax_attempts = 0\n",
        )
        .unwrap();

        let result = ConfigManager::load_with_env_vars(
            Some(temp_dir.path().to_path_buf()),
            "development",
            HashMap::new(),
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "retry.max_attempts"
        ));
    }

    #[test]
    fn test_malformed_file_is_a_load_error() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("stepflow.toml"), "[engine\n").unwrap();

        let result = ConfigManager::load_with_env_vars(
            Some(temp_dir.path().to_path_buf()),
            "development",
            HashMap::new(),
        );
        assert!(matches!(result, Err(ConfigurationError::LoadError { .. })));
    }

    #[test]
    fn test_debug_config_masks_signing_keys() {
        let temp_dir = setup_test_config_dir();
        let manager = ConfigManager::load_with_env_vars(
            Some(temp_dir.path().to_path_buf()),
            "development",
            HashMap::new(),
        )
        .unwrap();

        let debug = manager.debug_config();
        assert_eq!(
            debug["webhook"]["current_signing_key"],
            serde_json::json!("[MASKED: wh***ue]")
        );
        assert!(debug["webhook"]["next_signing_key"].is_null());
        assert_eq!(debug["providers"][1]["key_prefix"], serde_json::json!("orders"));
        assert!(debug["rate_limit"]["tokens"].is_u64());
    }
}
