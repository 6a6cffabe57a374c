use thiserror::Error;

/// Errors raised while applying execution state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on event {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Execution is already terminal ({state}); no further transitions are accepted")]
    AlreadyTerminal { state: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
