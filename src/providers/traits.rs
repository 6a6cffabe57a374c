use crate::error::OrchestrationResult;
use crate::messaging::StepMessage;
use crate::models::{
    CompensationErrorRecord, ListExecutionsOptions, StepResult, WorkflowDefinition,
    WorkflowExecution,
};
use crate::providers::HealthCheckResult;
use crate::state_machine::ExecutionEvent;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Executes, tracks and schedules workflows against some backing substrate.
///
/// Providers own their execution records. The engine never caches them; every
/// call reads through to the provider.
#[async_trait]
pub trait WorkflowProvider: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Create a running execution and dispatch its first step (or parallel run)
    async fn execute(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
    ) -> OrchestrationResult<WorkflowExecution>;

    async fn get_execution(&self, execution_id: Uuid)
        -> OrchestrationResult<Option<WorkflowExecution>>;

    /// Executions of `workflow_id`, newest first
    async fn list_executions(
        &self,
        workflow_id: &str,
        options: &ListExecutionsOptions,
    ) -> OrchestrationResult<Vec<WorkflowExecution>>;

    /// Returns `true` only if the execution existed and was not yet terminal
    async fn cancel_execution(&self, execution_id: Uuid) -> OrchestrationResult<bool>;

    /// Register the definition's cron schedule, returning the schedule id
    async fn schedule_workflow(&self, definition: &WorkflowDefinition)
        -> OrchestrationResult<String>;

    /// Returns `false` when no schedule matched
    async fn unschedule_workflow(&self, workflow_id: &str) -> OrchestrationResult<bool>;

    async fn update_execution_status(
        &self,
        execution_id: Uuid,
        event: ExecutionEvent,
    ) -> OrchestrationResult<WorkflowExecution>;

    /// Insert or replace the result for one step
    async fn record_step_result(
        &self,
        execution_id: Uuid,
        result: StepResult,
    ) -> OrchestrationResult<WorkflowExecution>;

    async fn record_compensation_errors(
        &self,
        execution_id: Uuid,
        errors: Vec<CompensationErrorRecord>,
    ) -> OrchestrationResult<WorkflowExecution>;

    /// Publish one step for asynchronous processing, returning the message id
    async fn enqueue_step(&self, message: StepMessage) -> OrchestrationResult<String>;

    /// Never fails; problems are reported in the result
    async fn health_check(&self) -> HealthCheckResult;

    async fn shutdown(&self) -> OrchestrationResult<()>;
}
