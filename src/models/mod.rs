//! # Data Model
//!
//! Workflow definitions (immutable once submitted) and the mutable execution
//! records providers persist for them.

pub mod execution;
pub mod workflow;

pub use execution::{CompensationErrorRecord, ListExecutionsOptions, StepResult, WorkflowExecution};
pub use workflow::{
    BackoffStrategy, NextSteps, RetryOverride, ScheduleSpec, StepDefinition, WorkflowDefinition,
};
