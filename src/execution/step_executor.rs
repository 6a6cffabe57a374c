//! # Step Executor
//!
//! Runs one step's action with retries and a circuit breaker keyed by the
//! action id. Every attempt goes through the breaker, so a dependency that keeps
//! failing across executions stops being called until its cool-down passes.

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::execution::{ActionRegistry, StepContext};
use crate::models::{StepDefinition, StepResult};
use crate::resilience::{policy_from_override, retry_counting, CircuitBreakerManager, RetryPolicy};
use crate::utils::Clock;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Outcome of running one step through all its attempts
#[derive(Debug)]
pub struct StepExecution {
    pub step_id: String,
    pub result: OrchestrationResult<Value>,
    /// Attempts made; zero when the action could not be resolved
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StepExecution {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn to_step_result(&self) -> StepResult {
        match &self.result {
            Ok(output) => StepResult::completed(
                &self.step_id,
                output.clone(),
                self.attempts,
                self.started_at,
                self.finished_at,
            ),
            Err(error) => StepResult::failed(
                &self.step_id,
                error.to_string(),
                self.attempts,
                self.started_at,
                self.finished_at,
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepExecutor {
    actions: Arc<ActionRegistry>,
    breakers: CircuitBreakerManager,
    default_retry: Arc<dyn RetryPolicy>,
    clock: Arc<dyn Clock>,
}

impl StepExecutor {
    pub fn new(
        actions: Arc<ActionRegistry>,
        breakers: CircuitBreakerManager,
        default_retry: Arc<dyn RetryPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            actions,
            breakers,
            default_retry,
            clock,
        }
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    pub fn breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    /// Policy for `step`: its own override, or the engine default
    fn policy_for(&self, step: &StepDefinition) -> Arc<dyn RetryPolicy> {
        step.retry
            .as_ref()
            .map(policy_from_override)
            .unwrap_or_else(|| Arc::clone(&self.default_retry))
    }

    /// Run `step` until it succeeds or its retry policy gives up
    #[instrument(skip(self, step, context), fields(execution_id = %context.execution_id, step_id = %step.id, action = %step.action))]
    pub async fn execute(&self, step: &StepDefinition, context: StepContext) -> StepExecution {
        let started_at = self.clock.now();

        let action = match self.actions.get(&step.action) {
            Ok(action) => action,
            Err(error) => {
                warn!(error = %error, "Step action is not registered");
                return StepExecution {
                    step_id: step.id.clone(),
                    result: Err(error),
                    attempts: 0,
                    started_at,
                    finished_at: self.clock.now(),
                };
            }
        };

        let policy = self.policy_for(step);
        let breakers = &self.breakers;
        let key = step.action.as_str();

        let outcome = retry_counting(policy.as_ref(), self.clock.as_ref(), |attempt| {
            let context = context.clone().with_attempt(attempt);
            let action = Arc::clone(&action);
            async move {
                debug!(attempt = attempt, "Running step action");
                breakers
                    .call(key, || action.execute(&context))
                    .await
                    .map_err(OrchestrationError::from)
            }
        })
        .await;

        StepExecution {
            step_id: step.id.clone(),
            result: outcome.result,
            attempts: outcome.attempts,
            started_at,
            finished_at: self.clock.now(),
        }
    }

    /// Run a compensation action once, through the breaker for its action id
    pub async fn compensate(&self, action_id: &str, context: StepContext) -> OrchestrationResult<()> {
        let action = self.actions.get(action_id)?;
        self.breakers
            .call(action_id, || action.execute(&context))
            .await
            .map_err(OrchestrationError::from)?;
        Ok(())
    }
}
