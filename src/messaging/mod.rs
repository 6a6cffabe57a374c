//! # Messaging Module
//!
//! Queue-based step dispatch. The provider publishes a [`StepMessage`] per ready
//! step; whatever consumes the queue hands it back to
//! [`crate::orchestration::OrchestrationEngine::handle_step`].

pub mod message;
pub mod queue;

pub use message::StepMessage;
pub use queue::{InMemoryMessageQueue, MessageQueue, QueuedMessage, ScheduleRequest};
