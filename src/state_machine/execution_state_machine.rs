use super::errors::{StateMachineError, StateMachineResult};
use super::events::ExecutionEvent;
use super::states::ExecutionStatus;
use crate::models::WorkflowExecution;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Applies execution lifecycle transitions.
///
/// Stateless: providers load a record, call [`ExecutionStateMachine::apply`], and
/// write the record back.
pub struct ExecutionStateMachine;

impl ExecutionStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current: ExecutionStatus,
        event: &ExecutionEvent,
    ) -> StateMachineResult<ExecutionStatus> {
        if current.is_terminal() {
            return Err(StateMachineError::AlreadyTerminal {
                state: current.to_string(),
            });
        }

        let target = match (current, event) {
            (ExecutionStatus::Pending, ExecutionEvent::Start) => ExecutionStatus::Running,

            (ExecutionStatus::Running, ExecutionEvent::Complete) => ExecutionStatus::Completed,

            (ExecutionStatus::Pending, ExecutionEvent::Fail(_))
            | (ExecutionStatus::Running, ExecutionEvent::Fail(_)) => ExecutionStatus::Failed,

            (ExecutionStatus::Pending, ExecutionEvent::Cancel)
            | (ExecutionStatus::Running, ExecutionEvent::Cancel) => ExecutionStatus::Cancelled,

            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Apply `event` to `execution`, stamping the matching timestamp
    pub fn apply(
        execution: &mut WorkflowExecution,
        event: &ExecutionEvent,
        at: DateTime<Utc>,
    ) -> StateMachineResult<ExecutionStatus> {
        let from = execution.status;
        let target = Self::determine_target_state(from, event)?;

        match target {
            ExecutionStatus::Completed => execution.completed_at = Some(at),
            ExecutionStatus::Failed => {
                execution.failed_at = Some(at);
                execution.error = event.error_message().map(str::to_string);
            }
            ExecutionStatus::Cancelled => execution.cancelled_at = Some(at),
            ExecutionStatus::Pending | ExecutionStatus::Running => {}
        }
        execution.status = target;

        debug!(
            execution_id = %execution.id,
            from = %from,
            to = %target,
            event = event.event_type(),
            "Execution transitioned"
        );

        Ok(target)
    }
}
