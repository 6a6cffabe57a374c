//! # Configuration Management
//!
//! Typed configuration for the orchestration core. [`ConfigManager`] layers
//! built-in defaults, `config/stepflow.toml`, an environment overlay
//! (`config/stepflow.{env}.toml`) and `STEPFLOW__*` environment variables, then
//! validates the result before anything is constructed from it.

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::models::BackoffStrategy;
use crate::resilience::{
    ExponentialBackoffPolicy, FixedDelayPolicy, RateLimitAlgorithm, RateLimitPattern,
    RetryPolicy, TransientErrorPolicy,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StepflowConfig {
    pub engine: EngineSettings,
    pub providers: Vec<ProviderSettings>,
    pub retry: RetrySettings,
    pub circuit_breakers: CircuitBreakerSettings,
    pub rate_limit: RateLimitSettings,
    pub webhook: WebhookSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Provider used when a call names none; falls back to the first registered
    pub default_provider: Option<String>,
    /// Upper bound on a single provider health check
    pub health_check_timeout_ms: u64,
    /// Capacity of the lifecycle event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_provider: None,
            health_check_timeout_ms: 5000,
            event_channel_capacity: 1000,
        }
    }
}

impl EngineSettings {
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}

/// One provider registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    /// Provider kind: `queue` or `memory`
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    #[serde(default)]
    pub default: bool,
}

fn default_key_prefix() -> String {
    "stepflow".to_string()
}

fn default_queue_name() -> String {
    "stepflow_steps".to_string()
}

impl ProviderSettings {
    pub fn new(name: impl Into<String>, provider_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider_type: provider_type.into(),
            key_prefix: default_key_prefix(),
            queue_name: default_queue_name(),
            default: false,
        }
    }
}

/// Engine-wide retry policy for steps without their own override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_factor: f64,
    /// Only retry errors classified as transient
    pub transient_only: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
            transient_only: false,
        }
    }
}

impl RetrySettings {
    /// Build the policy these settings describe
    pub fn to_policy(&self) -> Arc<dyn RetryPolicy> {
        let base_delay = Duration::from_millis(self.base_delay_ms);
        match (self.strategy, self.transient_only) {
            (BackoffStrategy::Fixed, false) => {
                Arc::new(FixedDelayPolicy::new(self.max_attempts, base_delay))
            }
            (BackoffStrategy::Fixed, true) => Arc::new(TransientErrorPolicy::new(
                FixedDelayPolicy::new(self.max_attempts, base_delay),
            )),
            (BackoffStrategy::Exponential, transient_only) => {
                let policy = ExponentialBackoffPolicy::new(self.max_attempts, base_delay)
                    .with_multiplier(self.multiplier)
                    .with_max_delay(Duration::from_millis(self.max_delay_ms))
                    .with_jitter(self.jitter_factor);
                if transient_only {
                    Arc::new(TransientErrorPolicy::new(policy))
                } else {
                    Arc::new(policy)
                }
            }
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    /// Soft cap; exceeding it is logged, never refused
    pub max_circuit_breakers: usize,
    pub default_config: CircuitBreakerComponentConfig,
    /// Per-key overrides, keyed by action id or dependency name
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_circuit_breakers: 1000,
            default_config: CircuitBreakerComponentConfig::default(),
            component_configs: HashMap::new(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Override for `component`, or the default
    pub fn config_for_component(&self, component: &str) -> CircuitBreakerComponentConfig {
        self.component_configs
            .get(component)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerComponentConfig {
    pub failure_threshold: u32,
    pub cool_down_ms: u64,
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down_ms: 30_000,
        }
    }
}

impl CircuitBreakerComponentConfig {
    pub fn to_resilience_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cool_down: Duration::from_millis(self.cool_down_ms),
        }
    }
}

/// Admission control applied to `execute_workflow`, one bucket per workflow id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub algorithm: String,
    pub tokens: u64,
    pub window_ms: u64,
    pub burst: Option<u64>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: RateLimitAlgorithm::FixedWindow.as_str().to_string(),
            tokens: 100,
            window_ms: 60_000,
            burst: None,
        }
    }
}

impl RateLimitSettings {
    /// Pattern for dispatching executions of `workflow_id`
    pub fn pattern_for_workflow(&self, workflow_id: &str) -> RateLimitPattern {
        let mut pattern = RateLimitPattern::new(self.tokens, Duration::from_millis(self.window_ms))
            .with_identifier(format!("workflow:{workflow_id}"))
            .with_algorithm(self.algorithm.clone())
            .throw_on_limit();
        if let Some(burst) = self.burst {
            pattern = pattern.with_burst(burst);
        }
        pattern
    }
}

/// Signing keys for the webhook re-entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WebhookSettings {
    pub current_signing_key: Option<String>,
    /// Accepted alongside the current key while a rotation is in progress
    pub next_signing_key: Option<String>,
}

impl StepflowConfig {
    /// Validate the loaded configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.engine.health_check_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.health_check_timeout_ms",
                self.engine.health_check_timeout_ms,
                "must be greater than 0",
            ));
        }
        if self.engine.event_channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.event_channel_capacity",
                self.engine.event_channel_capacity,
                "must be greater than 0",
            ));
        }

        let mut names = std::collections::HashSet::new();
        for (index, provider) in self.providers.iter().enumerate() {
            if provider.name.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    format!("providers[{index}].name"),
                    "provider settings",
                ));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(ConfigurationError::invalid_value(
                    format!("providers[{index}].name"),
                    &provider.name,
                    "provider names must be unique",
                ));
            }
            if provider.key_prefix.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    format!("providers[{index}].key_prefix"),
                    "provider settings",
                ));
            }
        }
        if self.providers.iter().filter(|p| p.default).count() > 1 {
            return Err(ConfigurationError::invalid_value(
                "providers.default",
                "multiple",
                "at most one provider may be flagged default",
            ));
        }
        if let Some(default) = &self.engine.default_provider {
            if !self.providers.iter().any(|p| &p.name == default) {
                return Err(ConfigurationError::invalid_value(
                    "engine.default_provider",
                    default,
                    "no provider with this name is configured",
                ));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                self.retry.max_attempts,
                "must be at least 1",
            ));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.multiplier",
                self.retry.multiplier,
                "must be at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigurationError::invalid_value(
                "retry.jitter_factor",
                self.retry.jitter_factor,
                "must be between 0.0 and 1.0",
            ));
        }

        let breakers = std::iter::once(("default_config", &self.circuit_breakers.default_config))
            .chain(
                self.circuit_breakers
                    .component_configs
                    .iter()
                    .map(|(name, config)| (name.as_str(), config)),
            );
        for (name, component) in breakers {
            component
                .to_resilience_config()
                .validate()
                .map_err(|reason| {
                    ConfigurationError::invalid_value(
                        format!("circuit_breakers.{name}"),
                        format!(
                            "threshold={} cool_down_ms={}",
                            component.failure_threshold, component.cool_down_ms
                        ),
                        reason,
                    )
                })?;
        }

        if self.rate_limit.enabled {
            self.rate_limit
                .pattern_for_workflow("validation")
                .validate()
                .map_err(|e| {
                    ConfigurationError::invalid_value(
                        format!("rate_limit.{}", e.field),
                        &self.rate_limit.algorithm,
                        e.message,
                    )
                })?;
        }

        Ok(())
    }
}
