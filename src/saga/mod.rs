//! # Saga Coordinator
//!
//! Forward execution of an ordered list of steps with compensation of the
//! completed ones, newest first, when a step fails.
//!
//! ```rust,no_run
//! use stepflow_core::saga::{FnSagaStep, SagaBuilder, SagaCoordinator};
//! use serde_json::json;
//!
//! # async fn example() -> stepflow_core::OrchestrationResult<()> {
//! let saga = SagaBuilder::new("order", "Place order")
//!     .step(
//!         FnSagaStep::new("reserve", |_input, _ctx| async { Ok(json!({"reservation": "r-1"})) })
//!             .with_compensation(|_input, _output, _ctx| async { Ok(()) }),
//!     )
//!     .step(FnSagaStep::new("pay", |_input, _ctx| async { Ok(json!({"paid": true})) }))
//!     .build()?;
//!
//! let result = SagaCoordinator::new().execute(&saga, json!({"order_id": 42})).await;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod compensation;
pub mod context;
pub mod coordinator;
pub mod step;

pub use builder::{SagaBuilder, SagaDefinition, SagaHook};
pub use compensation::compensate_in_reverse;
pub use context::{InMemoryResultStore, KeyValueResultStore, ResultStore, SagaContext};
pub use coordinator::{SagaCoordinator, SagaResult, SagaStatus};
pub use step::{FnSagaStep, SagaStep};
