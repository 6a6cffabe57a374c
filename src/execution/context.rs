use crate::messaging::StepMessage;
use crate::models::{StepDefinition, WorkflowExecution};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Everything an action sees about the step it is running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepContext {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub step_id: String,
    pub action: String,
    /// Execution input
    pub input: Value,
    /// Outputs of completed steps, keyed by step id
    pub results: HashMap<String, Value>,
    /// Current attempt, starting at 1
    pub attempt: u32,
    /// Deadline the action is expected to honour; never enforced by the engine
    pub timeout: Option<Duration>,
    /// Output of the step being undone, set only when running a compensation
    pub compensated_output: Option<Value>,
}

impl StepContext {
    pub fn new(
        execution_id: Uuid,
        workflow_id: impl Into<String>,
        step: &StepDefinition,
        input: Value,
    ) -> Self {
        Self {
            execution_id,
            workflow_id: workflow_id.into(),
            step_id: step.id.clone(),
            action: step.action.clone(),
            input,
            results: HashMap::new(),
            attempt: 1,
            timeout: step.timeout(),
            compensated_output: None,
        }
    }

    /// Context for running `step` on behalf of `message`, seeded with the
    /// outputs already recorded on `execution`
    pub fn for_message(
        message: &StepMessage,
        step: &StepDefinition,
        execution: &WorkflowExecution,
    ) -> Self {
        let mut context = Self::new(
            message.execution_id,
            &message.workflow_id,
            step,
            message.input.clone(),
        );
        context.results = execution
            .step_results
            .iter()
            .filter(|result| result.is_completed())
            .filter_map(|result| {
                result
                    .output
                    .as_ref()
                    .map(|output| (result.step_id.clone(), output.clone()))
            })
            .collect();
        context
    }

    /// Context for the compensation action of `step`
    pub fn for_compensation(&self, action: &str, output: Value) -> Self {
        Self {
            action: action.to_string(),
            attempt: 1,
            compensated_output: Some(output),
            ..self.clone()
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Output of an earlier step
    pub fn result(&self, step_id: &str) -> Option<&Value> {
        self.results.get(step_id)
    }
}
