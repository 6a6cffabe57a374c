//! Provider health reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health of one provider dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyCheck {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DependencyCheck {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }

    /// Dependency absent from the provider's configuration
    pub fn not_configured() -> Self {
        Self::unhealthy("not configured")
    }
}

/// Health check result for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    /// Per-dependency detail, keyed by dependency name
    pub checks: BTreeMap<String, DependencyCheck>,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckResult {
    /// Any unhealthy or missing dependency makes the provider unhealthy
    pub fn from_checks(
        checks: BTreeMap<String, DependencyCheck>,
        response_time_ms: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let status = if checks.values().all(|check| check.status.is_healthy()) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        Self {
            status,
            checks,
            response_time_ms,
            timestamp,
        }
    }

    /// Result for a provider whose check errored or timed out
    pub fn unhealthy(reason: impl Into<String>, response_time_ms: u64, timestamp: DateTime<Utc>) -> Self {
        let mut checks = BTreeMap::new();
        checks.insert("provider".to_string(), DependencyCheck::unhealthy(reason));
        Self {
            status: HealthStatus::Unhealthy,
            checks,
            response_time_ms,
            timestamp,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}
