//! # Events
//!
//! Lifecycle event emission. Components depend on the narrow [`EventEmitter`]
//! trait; [`EventPublisher`] is the broadcast-channel implementation.
//!
//! ```rust
//! use stepflow_core::events::{names, EventEmitter, EventPublisher};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new(16);
//! let mut events = publisher.subscribe();
//!
//! publisher.emit(names::EXECUTION_STARTED, json!({"workflow_id": "wf1"}));
//!
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.name, names::EXECUTION_STARTED);
//! # });
//! ```

pub mod publisher;

pub use publisher::{EventEmitter, EventPublisher, NoopEmitter, PublishedEvent};

/// Event names emitted by the engine and saga coordinator
pub mod names {
    pub const EXECUTION_STARTED: &str = "execution.started";
    pub const EXECUTION_COMPLETED: &str = "execution.completed";
    pub const EXECUTION_FAILED: &str = "execution.failed";
    pub const EXECUTION_CANCELLED: &str = "execution.cancelled";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";

    pub const SAGA_STARTED: &str = "saga.started";
    pub const SAGA_STEP_COMPLETED: &str = "saga.step.completed";
    pub const SAGA_STEP_FAILED: &str = "saga.step.failed";
    pub const SAGA_COMPENSATION_COMPLETED: &str = "saga.compensation.completed";
    pub const SAGA_COMPENSATION_FAILED: &str = "saga.compensation.failed";
    pub const SAGA_COMPLETED: &str = "saga.completed";
    pub const SAGA_FAILED: &str = "saga.failed";
}
