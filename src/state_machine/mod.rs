// State machine module for workflow executions
//
// Executions move through a small, monotonic lifecycle. Transitions are pure
// functions of (current state, event) so providers can apply them inside their
// own read-modify-write cycle without holding any engine-side state.

pub mod errors;
pub mod events;
pub mod execution_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::ExecutionEvent;
pub use execution_state_machine::ExecutionStateMachine;
pub use states::{ExecutionStatus, StepStatus};
