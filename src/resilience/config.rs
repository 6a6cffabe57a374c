//! # Circuit Breaker Configuration
//!
//! Per-breaker settings. System-wide defaults and per-key overrides live in
//! [`crate::config::CircuitBreakerSettings`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time to wait in open state before admitting a half-open probe
    pub cool_down: Duration,
}

impl CircuitBreakerConfig {
    /// Create configuration for persistence operations
    pub fn for_store() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
        }
    }

    /// Create configuration for queue operations
    pub fn for_queue() -> Self {
        Self {
            failure_threshold: 3,
            cool_down: Duration::from_secs(15),
        }
    }

    /// Create configuration for external API calls made by step actions
    pub fn for_external_api() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(45),
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.cool_down.is_zero() {
            return Err("cool_down must be greater than 0".to_string());
        }

        if self.cool_down > Duration::from_secs(3600) {
            return Err("cool_down should not exceed 3600 seconds".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
        }
    }
}
