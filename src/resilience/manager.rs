//! # Circuit Breaker Manager
//!
//! Registry of per-key circuit breakers. A breaker is created lazily on first use
//! from the key's configured override (or the default) and lives until removed.

use crate::config::CircuitBreakerSettings;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerMetrics, CircuitState,
    SystemCircuitBreakerMetrics,
};
use crate::utils::{Clock, SystemClock};
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Manager for circuit breakers keyed by dependency name
#[derive(Debug, Clone)]
pub struct CircuitBreakerManager {
    circuit_breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    settings: CircuitBreakerSettings,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerManager {
    pub fn from_config(settings: &CircuitBreakerSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: &CircuitBreakerSettings, clock: Arc<dyn Clock>) -> Self {
        info!(
            overrides = settings.component_configs.len(),
            "Initializing circuit breaker manager"
        );

        Self {
            circuit_breakers: Arc::new(DashMap::new()),
            settings: settings.clone(),
            clock,
        }
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Get or create the circuit breaker for `key`
    pub fn get_circuit_breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.get(key) {
            return Arc::clone(breaker.value());
        }

        if self.circuit_breakers.len() >= self.settings.max_circuit_breakers {
            warn!(
                key = key,
                current_count = self.circuit_breakers.len(),
                max_allowed = self.settings.max_circuit_breakers,
                "🚨 Maximum circuit breaker limit reached"
            );
        }

        // The entry lock settles races between callers creating the same key
        self.circuit_breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                let config = self.settings.config_for_component(key).to_resilience_config();
                info!(key = key, "Created new circuit breaker");
                Arc::new(CircuitBreaker::with_clock(
                    key.to_string(),
                    config,
                    Arc::clone(&self.clock),
                ))
            })
            .clone()
    }

    /// Route `operation` through the breaker for `key`.
    ///
    /// When breakers are disabled the operation runs unguarded.
    pub async fn call<F, T, E, Fut>(&self, key: &str, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.settings.enabled {
            return operation().await.map_err(CircuitBreakerError::OperationFailed);
        }
        self.get_circuit_breaker(key).call(operation).await
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.circuit_breakers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn get_key_metrics(&self, key: &str) -> Option<CircuitBreakerMetrics> {
        self.circuit_breakers.get(key).map(|entry| entry.metrics())
    }

    /// Get system-wide circuit breaker metrics
    pub fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new(self.clock.now());

        for entry in self.circuit_breakers.iter() {
            system_metrics.add_circuit_breaker(entry.key().clone(), entry.value().metrics());
        }

        system_metrics
    }

    /// Force open all circuit breakers (emergency stop)
    pub fn force_open_all(&self) {
        warn!("🚨 Forcing all circuit breakers open (emergency stop)");

        for entry in self.circuit_breakers.iter() {
            entry.value().force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub fn force_close_all(&self) {
        warn!("🚨 Forcing all circuit breakers closed (emergency recovery)");

        for entry in self.circuit_breakers.iter() {
            entry.value().force_closed();
        }
    }

    /// Evict the breaker for `key`; the next call starts a fresh closed breaker
    pub fn remove_circuit_breaker(&self, key: &str) -> bool {
        if self.circuit_breakers.remove(key).is_some() {
            info!(
                key = key,
                remaining_count = self.circuit_breakers.len(),
                "🗑️ Removed circuit breaker"
            );
            true
        } else {
            false
        }
    }

    pub fn get_state_summary(&self) -> HashMap<CircuitState, usize> {
        self.get_system_metrics().count_by_state()
    }

    /// Keys whose breaker is open or half-open
    pub fn tripped_keys(&self) -> Vec<String> {
        self.get_system_metrics()
            .tripped_keys()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}
