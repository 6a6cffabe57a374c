//! # Workflow Providers
//!
//! A provider executes, tracks, cancels and schedules workflows against some
//! backing substrate. The engine routes every call to a named provider and
//! never holds execution state itself.

pub mod config;
pub mod health;
pub mod queue_provider;
pub mod traits;

pub use config::{ProviderConfig, ProviderKind};
pub use health::{DependencyCheck, HealthCheckResult, HealthStatus};
pub use queue_provider::{QueueWorkflowProvider, ScheduleRecord};
pub use traits::WorkflowProvider;
