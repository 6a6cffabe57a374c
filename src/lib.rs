#![allow(clippy::doc_markdown)] // Allow technical terms like HMAC, JSON in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Stepflow Core
//!
//! Provider-abstracted workflow orchestration with saga compensation and
//! resilience primitives.
//!
//! ## Overview
//!
//! Workflows are ordered lists of steps, each naming an action registered with
//! the engine. An [`OrchestrationEngine`] dispatches executions to a named
//! [`providers::WorkflowProvider`], which persists the execution record and
//! publishes one message per ready step. Whoever consumes those messages calls
//! [`OrchestrationEngine::handle_step`] to run the step and advance the
//! execution.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Engine, provider registry and step re-entry
//! - [`providers`] - Provider trait, queue-backed provider and health checks
//! - [`execution`] - Action registry and retry/breaker-wrapped step executor
//! - [`saga`] - Standalone saga coordinator with reverse compensation
//! - [`resilience`] - Retry policies, circuit breakers and rate limiting
//! - [`models`] - Workflow definitions and execution records
//! - [`state_machine`] - Execution lifecycle transitions
//! - [`persistence`] / [`messaging`] - Store and queue capabilities
//! - [`reentry`] - Signed webhook delivery of step messages
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stepflow_core::execution::ActionRegistry;
//! use stepflow_core::models::{StepDefinition, WorkflowDefinition};
//! use stepflow_core::providers::ProviderConfig;
//! use stepflow_core::OrchestrationEngine;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> stepflow_core::OrchestrationResult<()> {
//! let actions = Arc::new(ActionRegistry::new());
//! actions.register_fn("reserve", |_ctx| async { Ok(json!({"hold": "h-1"})) });
//!
//! let engine = OrchestrationEngine::new(actions);
//! engine.register("primary", ProviderConfig::memory())?;
//! engine.initialize().await?;
//!
//! let definition = WorkflowDefinition::new("order", "Place order", "1.0.0")
//!     .with_step(StepDefinition::new("reserve", "reserve"));
//! let execution = engine.execute_workflow(&definition, Some(json!({"order": 7})), None).await?;
//! println!("started {}", execution.id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod providers;
pub mod reentry;
pub mod resilience;
pub mod saga;
pub mod state_machine;
pub mod utils;

pub use config::{ConfigManager, ConfigurationError, StepflowConfig};
pub use error::{
    CircuitOpenError, ErrorCategory, OrchestrationError, OrchestrationResult, ProviderError,
    RateLimitError, ValidationError,
};
pub use models::{StepDefinition, WorkflowDefinition, WorkflowExecution};
pub use orchestration::{OrchestrationEngine, StepOutcome};
pub use state_machine::ExecutionStatus;
