//! Point-in-time counters for circuit breakers, per key and across a
//! [`crate::resilience::CircuitBreakerManager`].

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Snapshot of one breaker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Calls that reached the guarded operation
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Calls rejected without invoking the operation
    pub rejected_count: u64,
    pub consecutive_failures: u64,
    /// Probes admitted while half-open
    pub half_open_calls: u64,
    pub total_duration: Duration,
    pub average_duration: Duration,
    pub failure_rate: f64,
    pub current_state: CircuitState,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Snapshot of every breaker a manager owns, keyed by dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,
    pub collected_at: DateTime<Utc>,
}

impl SystemCircuitBreakerMetrics {
    pub fn new(collected_at: DateTime<Utc>) -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at,
        }
    }

    pub fn add_circuit_breaker(&mut self, key: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(key, metrics);
    }

    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();
        for metrics in self.circuit_breakers.values() {
            *counts.entry(metrics.current_state).or_insert(0) += 1;
        }
        counts
    }

    /// Keys whose breaker is currently rejecting or probing
    pub fn tripped_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .circuit_breakers
            .iter()
            .filter(|(_, metrics)| metrics.current_state != CircuitState::Closed)
            .map(|(key, _)| key.as_str())
            .collect();
        keys.sort_unstable();
        keys
    }
}
