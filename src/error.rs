//! # Error Types
//!
//! Structured error handling for the orchestration core. Leaf errors carry the
//! fields callers branch on (limits, cool-downs, provider names); the crate-wide
//! [`OrchestrationError`] wraps them so a single `match` covers every failure kind.

use crate::config::ConfigurationError;
use crate::state_machine::StateMachineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Invalid caller input. Raised before any provider call and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Validation error on {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A provider or one of its backing dependencies failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Provider {provider} failed during {operation}: {reason}")]
pub struct ProviderError {
    pub provider: String,
    pub operation: String,
    pub reason: String,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// A rate-limited call was denied and the caller asked for an error instead of a decision.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Rate limit exceeded: {limit} requests per {window:?}, retry after {retry_after:?}")]
pub struct RateLimitError {
    pub limit: u64,
    pub window: Duration,
    pub retry_after: Duration,
}

/// The circuit for `key` is open; the guarded dependency was not called.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Circuit breaker open for {key} (cool-down remaining {cool_down_remaining:?})")]
pub struct CircuitOpenError {
    pub key: String,
    pub cool_down_remaining: Duration,
}

/// Broad error categories used by retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Will never succeed if retried
    Permanent,
    /// May succeed on retry
    Transient,
    Timeout,
    Network,
    RateLimit,
    /// Caller error, never retried
    Validation,
    /// Deliberate backpressure from an open circuit
    CircuitOpen,
    /// Requires operator intervention
    Configuration,
}

impl ErrorCategory {
    /// Transient failures that a classifying retry policy may retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient | Self::Timeout | Self::Network | Self::RateLimit
        )
    }

    /// Categories no retry policy may retry
    pub fn fails_fast(&self) -> bool {
        matches!(self, Self::Validation | Self::CircuitOpen | Self::Configuration)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Permanent => write!(f, "permanent"),
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::RateLimit => write!(f, "rate_limit"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::CircuitOpen => write!(f, "circuit_open"),
            ErrorCategory::Configuration => write!(f, "configuration"),
        }
    }
}

/// Crate-wide error type
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Unknown provider type: {provider_type}")]
    UnknownProviderType { provider_type: String },

    #[error("Provider not found: {name}")]
    ProviderNotFound { name: String },

    #[error("No default provider registered")]
    NoDefaultProvider,

    #[error("Engine not initialized: call initialize() before {operation}")]
    NotInitialized { operation: String },

    #[error("Provider {provider} has no {dependency} configured; {operation} is unavailable")]
    NotConfigured {
        provider: String,
        dependency: String,
        operation: String,
    },

    #[error("Execution {execution_id} not found")]
    ExecutionNotFound { execution_id: Uuid },

    #[error("Action not registered: {action}")]
    ActionNotFound { action: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout error for operation {operation}: {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("Step {step_id} failed: {reason}")]
    StepFailed { step_id: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestrationError {
    /// Convenience constructor for action implementations
    pub fn step_failed(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StepFailed {
            step_id: step_id.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error for retry decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::ActionNotFound { .. } => ErrorCategory::Validation,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::RateLimited(_) => ErrorCategory::RateLimit,
            Self::CircuitOpen(_) => ErrorCategory::CircuitOpen,
            Self::Provider(_) => ErrorCategory::Transient,
            Self::Configuration(_)
            | Self::UnknownProviderType { .. }
            | Self::ProviderNotFound { .. }
            | Self::NoDefaultProvider
            | Self::NotInitialized { .. }
            | Self::NotConfigured { .. } => ErrorCategory::Configuration,
            Self::StateMachine(_)
            | Self::ExecutionNotFound { .. }
            | Self::StepFailed { .. }
            | Self::Serialization(_)
            | Self::Internal(_) => ErrorCategory::Permanent,
        }
    }

    /// Whether a classifying retry policy would consider this error retryable
    pub fn is_transient(&self) -> bool {
        self.category().is_transient()
    }
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(error: serde_json::Error) -> Self {
        OrchestrationError::Serialization(error.to_string())
    }
}

pub type OrchestrationResult<T> = std::result::Result<T, OrchestrationError>;
