//! Saga execution: forward pass, reverse compensation and outcome hooks.

use super::{compensate_in_reverse, SagaContext, SagaDefinition, SagaHook, SagaStep};
use crate::error::OrchestrationError;
use crate::events::{names, EventEmitter, NoopEmitter};
use crate::models::CompensationErrorRecord;
use crate::utils::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

/// Lifecycle of one saga run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    NotStarted,
    Running,
    Completed,
    Compensating,
    /// Every compensation succeeded
    Compensated,
    /// At least one compensation failed
    CompensationFailed,
}

impl SagaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Compensated | Self::CompensationFailed
        )
    }
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
            Self::CompensationFailed => "compensation_failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a saga run
#[derive(Debug, Clone, PartialEq)]
pub struct SagaResult {
    pub success: bool,
    pub status: SagaStatus,
    /// Outputs of the steps that completed, keyed by step id
    pub state: Map<String, Value>,
    pub failed_step: Option<String>,
    pub error: Option<OrchestrationError>,
    /// In the order the failures occurred (newest step first)
    pub compensation_errors: Vec<CompensationErrorRecord>,
}

impl SagaResult {
    /// Message of the step failure, if any
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Runs saga definitions
#[derive(Debug, Clone)]
pub struct SagaCoordinator {
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventEmitter>,
}

impl Default for SagaCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SagaCoordinator {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            events: Arc::new(NoopEmitter),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = events;
        self
    }

    /// Run `saga` with a fresh context built from this coordinator's capabilities
    pub async fn execute(&self, saga: &SagaDefinition, input: Value) -> SagaResult {
        let ctx = SagaContext::new(saga.id.clone(), input)
            .with_clock(Arc::clone(&self.clock))
            .with_events(Arc::clone(&self.events));
        self.execute_with_context(saga, ctx).await
    }

    /// Run `saga` with a caller-assembled context
    pub async fn execute_with_context(&self, saga: &SagaDefinition, ctx: SagaContext) -> SagaResult {
        let span = ctx.span.clone();
        Self::run(saga, ctx).instrument(span).await
    }

    async fn run(saga: &SagaDefinition, ctx: SagaContext) -> SagaResult {
        let started = ctx.clock.now();
        let mut status = SagaStatus::Running;
        info!(saga_id = %saga.id, steps = saga.steps.len(), status = %status, "Saga started");
        ctx.emit(names::SAGA_STARTED, json!({ "steps": saga.step_ids() }));

        let mut state = Map::new();
        let mut completed: Vec<(String, (Arc<dyn SagaStep>, Value))> = Vec::new();
        let mut failure: Option<(String, OrchestrationError)> = None;

        for step in &saga.steps {
            let step_id = step.id().to_string();
            // A step whose action ran is compensated even if storing its output fails
            let outcome = match step.execute(&ctx.input, &ctx).await {
                Ok(output) => {
                    completed.push((step_id.clone(), (Arc::clone(step), output.clone())));
                    ctx.results
                        .set(&step_id, output.clone())
                        .await
                        .map(|()| output)
                }
                Err(error) => Err(error),
            };

            match outcome {
                Ok(output) => {
                    ctx.emit(names::SAGA_STEP_COMPLETED, json!({ "step_id": step_id }));
                    state.insert(step_id, output);
                }
                Err(error) => {
                    warn!(step_id = %step_id, error = %error, "Saga step failed");
                    ctx.emit(
                        names::SAGA_STEP_FAILED,
                        json!({ "step_id": step_id, "error": error.to_string() }),
                    );
                    failure = Some((step_id, error));
                    break;
                }
            }
        }

        let result = match failure {
            None => {
                status = SagaStatus::Completed;
                let elapsed_ms = (ctx.clock.now() - started).num_milliseconds();
                info!(saga_id = %saga.id, status = %status, elapsed_ms, "Saga completed");
                ctx.emit(names::SAGA_COMPLETED, json!({ "state": state }));
                SagaResult {
                    success: true,
                    status,
                    state,
                    failed_step: None,
                    error: None,
                    compensation_errors: Vec::new(),
                }
            }
            Some((failed_step, error)) => {
                status = SagaStatus::Compensating;
                info!(
                    saga_id = %saga.id,
                    failed_step = %failed_step,
                    to_compensate = completed.len(),
                    status = %status,
                    "Compensating completed saga steps"
                );

                let compensation_errors = Self::compensate(&ctx, completed).await;

                status = if compensation_errors.is_empty() {
                    SagaStatus::Compensated
                } else {
                    SagaStatus::CompensationFailed
                };
                warn!(
                    saga_id = %saga.id,
                    failed_step = %failed_step,
                    compensation_failures = compensation_errors.len(),
                    status = %status,
                    "Saga failed"
                );
                ctx.emit(
                    names::SAGA_FAILED,
                    json!({
                        "failed_step": failed_step,
                        "error": error.to_string(),
                        "status": status.to_string(),
                        "compensation_errors": compensation_errors,
                    }),
                );

                SagaResult {
                    success: false,
                    status,
                    state,
                    failed_step: Some(failed_step),
                    error: Some(error),
                    compensation_errors,
                }
            }
        };

        let hook = if result.success {
            saga.on_success.as_ref()
        } else {
            saga.on_failure.as_ref()
        };
        Self::run_hook(hook, &result, &ctx);

        result
    }

    async fn compensate(
        ctx: &SagaContext,
        completed: Vec<(String, (Arc<dyn SagaStep>, Value))>,
    ) -> Vec<CompensationErrorRecord> {
        compensate_in_reverse(completed, |step_id, (step, output)| async move {
            if !step.has_compensation() {
                return Ok(());
            }
            match step.compensate(&ctx.input, &output, ctx).await {
                Ok(()) => {
                    ctx.emit(
                        names::SAGA_COMPENSATION_COMPLETED,
                        json!({ "step_id": step_id }),
                    );
                    Ok(())
                }
                Err(error) => {
                    ctx.emit(
                        names::SAGA_COMPENSATION_FAILED,
                        json!({ "step_id": step_id, "error": error.to_string() }),
                    );
                    Err(error)
                }
            }
        })
        .await
    }

    fn run_hook(hook: Option<&SagaHook>, result: &SagaResult, ctx: &SagaContext) {
        let Some(hook) = hook else {
            return;
        };
        if let Err(hook_error) = hook(result, ctx) {
            error!(
                saga_id = %ctx.saga_id,
                success = result.success,
                error = %hook_error,
                "Saga outcome hook failed"
            );
        }
    }
}
