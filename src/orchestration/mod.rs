//! # Orchestration
//!
//! The [`OrchestrationEngine`] routes workflow calls to named providers and
//! advances executions one delivered step at a time.
//!
//! ## Architecture
//!
//! The engine is stateless between calls:
//! - **Providers own state**: execution records, indexes and schedules live in
//!   the provider's store
//! - **Queues own progress**: each ready step is a [`crate::messaging::StepMessage`]
//!   that comes back through [`OrchestrationEngine::handle_step`]
//! - **Executor owns resilience**: every action runs behind a retry policy and a
//!   circuit breaker keyed by action id
//!
//! A failed step triggers compensation of completed steps, newest first, before
//! the execution is marked failed.

pub mod engine;

pub use engine::{OrchestrationEngine, OrchestrationEngineBuilder, SkipReason, StepOutcome};
