//! # Step Execution
//!
//! Actions registered by id, the context they run with, and the executor that
//! wraps each run in retry and circuit-breaker protection.

pub mod action;
pub mod context;
pub mod step_executor;

pub use action::{ActionRegistry, FnStepAction, StepAction};
pub use context::StepContext;
pub use step_executor::{StepExecution, StepExecutor};
