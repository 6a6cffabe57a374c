//! # Orchestration Engine
//!
//! Registry of named providers plus the step re-entry point. The engine holds no
//! execution state of its own: every call reads through to the provider that
//! owns the execution, and step progression is driven entirely by
//! [`OrchestrationEngine::handle_step`] calls arriving from a queue consumer or
//! the webhook handler.
//!
//! ## Lifecycle
//!
//! 1. [`OrchestrationEngine::register`] queues provider registrations
//! 2. [`OrchestrationEngine::initialize`] constructs and health-checks them
//! 3. workflow calls route to the named or default provider
//! 4. [`OrchestrationEngine::shutdown`] releases providers and clears the registry

use crate::config::{CircuitBreakerSettings, RateLimitSettings, StepflowConfig};
use crate::error::{OrchestrationError, OrchestrationResult, ValidationError};
use crate::events::{names, EventEmitter, EventPublisher, PublishedEvent};
use crate::execution::{ActionRegistry, StepContext, StepExecutor};
use crate::logging::{log_execution_operation, log_step_operation};
use crate::messaging::StepMessage;
use crate::models::{
    CompensationErrorRecord, ListExecutionsOptions, NextSteps, StepDefinition, WorkflowDefinition,
    WorkflowExecution,
};
use crate::providers::{HealthCheckResult, ProviderConfig, WorkflowProvider};
use crate::resilience::{CircuitBreakerManager, RateLimiter, RetryPolicy};
use crate::saga::compensate_in_reverse;
use crate::state_machine::{ExecutionEvent, ExecutionStatus};
use crate::utils::{Clock, SystemClock};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Why a delivered step was not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The execution already finished, failed or was cancelled
    ExecutionTerminal(ExecutionStatus),
    /// Duplicate delivery of a step that already completed
    AlreadyCompleted,
}

/// What `handle_step` did with one step message
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The step completed and these steps were enqueued next
    Dispatched { next: Vec<String> },
    /// The step completed; other members of its parallel run are outstanding
    Waiting,
    /// The step completed and so did the execution
    Completed,
    /// The step was not run
    Skipped(SkipReason),
    /// The step ran but the execution became terminal meanwhile; its result was dropped
    Discarded,
    /// The step failed terminally; completed steps were compensated
    Failed {
        error: String,
        compensation_errors: Vec<CompensationErrorRecord>,
    },
}

#[derive(Debug, Default)]
struct ProviderRegistry {
    pending: Vec<(String, ProviderConfig)>,
    providers: HashMap<String, Arc<dyn WorkflowProvider>>,
    /// Registration order, for deterministic reporting
    order: Vec<String>,
    default_provider: Option<String>,
    initialized: bool,
}

/// Builder for [`OrchestrationEngine`]
pub struct OrchestrationEngineBuilder {
    actions: Arc<ActionRegistry>,
    clock: Arc<dyn Clock>,
    events: Option<Arc<dyn EventEmitter>>,
    event_channel_capacity: usize,
    retry_policy: Arc<dyn RetryPolicy>,
    circuit_breakers: CircuitBreakerSettings,
    rate_limit: RateLimitSettings,
    health_check_timeout: Duration,
}

impl OrchestrationEngineBuilder {
    pub fn new(actions: Arc<ActionRegistry>) -> Self {
        let defaults = StepflowConfig::default();
        Self {
            actions,
            clock: Arc::new(SystemClock),
            events: None,
            event_channel_capacity: defaults.engine.event_channel_capacity,
            retry_policy: defaults.retry.to_policy(),
            circuit_breakers: defaults.circuit_breakers,
            rate_limit: defaults.rate_limit,
            health_check_timeout: defaults.engine.health_check_timeout(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Emit lifecycle events through `events` instead of the built-in publisher
    pub fn events(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn circuit_breakers(mut self, settings: CircuitBreakerSettings) -> Self {
        self.circuit_breakers = settings;
        self
    }

    pub fn rate_limit(mut self, settings: RateLimitSettings) -> Self {
        self.rate_limit = settings;
        self
    }

    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn build(self) -> OrchestrationEngine {
        let publisher = EventPublisher::new(self.event_channel_capacity);
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(publisher.clone()));
        let breakers = CircuitBreakerManager::with_clock(&self.circuit_breakers, Arc::clone(&self.clock));

        OrchestrationEngine {
            registry: RwLock::new(ProviderRegistry::default()),
            executor: StepExecutor::new(
                self.actions,
                breakers,
                self.retry_policy,
                Arc::clone(&self.clock),
            ),
            rate_limiter: RateLimiter::with_clock(Arc::clone(&self.clock)),
            rate_limit: self.rate_limit,
            publisher,
            events,
            clock: self.clock,
            health_check_timeout: self.health_check_timeout,
        }
    }
}

/// Provider-abstracted workflow orchestration
#[derive(Debug)]
pub struct OrchestrationEngine {
    registry: RwLock<ProviderRegistry>,
    executor: StepExecutor,
    rate_limiter: RateLimiter,
    rate_limit: RateLimitSettings,
    publisher: EventPublisher,
    events: Arc<dyn EventEmitter>,
    clock: Arc<dyn Clock>,
    health_check_timeout: Duration,
}

impl OrchestrationEngine {
    /// Engine with default settings over `actions`
    pub fn new(actions: Arc<ActionRegistry>) -> Self {
        Self::builder(actions).build()
    }

    pub fn builder(actions: Arc<ActionRegistry>) -> OrchestrationEngineBuilder {
        OrchestrationEngineBuilder::new(actions)
    }

    /// Engine configured from `config`, with every configured provider registered.
    ///
    /// Providers of kind `queue` are registered without backends; re-register
    /// them with [`ProviderConfig::with_store`] / [`ProviderConfig::with_queue`]
    /// before [`Self::initialize`], otherwise they run degraded.
    pub fn from_config(
        config: &StepflowConfig,
        actions: Arc<ActionRegistry>,
    ) -> OrchestrationResult<Self> {
        config.validate()?;

        let engine = Self::builder(actions)
            .retry_policy(config.retry.to_policy())
            .circuit_breakers(config.circuit_breakers.clone())
            .rate_limit(config.rate_limit.clone())
            .health_check_timeout(config.engine.health_check_timeout())
            .event_channel_capacity(config.engine.event_channel_capacity)
            .build();

        for settings in &config.providers {
            let mut provider_config = ProviderConfig::from_settings(settings);
            if config.engine.default_provider.as_deref() == Some(settings.name.as_str()) {
                provider_config = provider_config.as_default();
            }
            engine.register(&settings.name, provider_config)?;
        }

        Ok(engine)
    }

    /// Queue a provider registration. The first registration, or the one flagged
    /// `default`, becomes the default provider. Re-registering a name replaces
    /// the pending registration.
    pub fn register(&self, name: &str, config: ProviderConfig) -> OrchestrationResult<()> {
        if name.trim().is_empty() {
            return Err(ValidationError::new("name", "provider name must not be empty").into());
        }

        let mut registry = self.registry.write();
        registry.pending.retain(|(pending, _)| pending != name);
        debug!(provider = name, provider_type = %config.provider_type, "Provider registration queued");
        registry.pending.push((name.to_string(), config));
        Ok(())
    }

    /// Construct every registered provider and health-check it.
    ///
    /// An unknown provider type fails initialization. Unhealthy providers are
    /// logged and kept so the engine can start degraded.
    pub async fn initialize(&self) -> OrchestrationResult<()> {
        let pending = std::mem::take(&mut self.registry.write().pending);

        let mut built = Vec::with_capacity(pending.len());
        for (name, config) in &pending {
            let provider = config.build(name, Arc::clone(&self.clock))?;
            built.push((name.clone(), config.default, provider));
        }

        for (name, _, provider) in &built {
            let health = self.check_provider(provider.as_ref()).await;
            if health.is_healthy() {
                info!(provider = %name, response_time_ms = health.response_time_ms, "✅ Provider healthy");
            } else {
                warn!(
                    provider = %name,
                    status = %health.status,
                    checks = ?health.checks,
                    "⚠️ Provider unhealthy at startup; keeping it registered in degraded mode"
                );
            }
        }

        let mut registry = self.registry.write();
        for (name, is_default, provider) in built {
            if is_default || registry.default_provider.is_none() {
                registry.default_provider = Some(name.clone());
            }
            if registry.providers.insert(name.clone(), provider).is_none() {
                registry.order.push(name);
            }
        }
        registry.initialized = true;

        info!(
            providers = registry.providers.len(),
            default_provider = ?registry.default_provider,
            "🚀 Orchestration engine initialized"
        );
        Ok(())
    }

    fn provider(&self, name: Option<&str>, operation: &str) -> OrchestrationResult<Arc<dyn WorkflowProvider>> {
        let registry = self.registry.read();
        if !registry.initialized {
            return Err(OrchestrationError::NotInitialized {
                operation: operation.to_string(),
            });
        }

        let name = match name {
            Some(name) => name,
            None => registry
                .default_provider
                .as_deref()
                .ok_or(OrchestrationError::NoDefaultProvider)?,
        };
        registry
            .providers
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestrationError::ProviderNotFound {
                name: name.to_string(),
            })
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.registry.read().order.clone()
    }

    pub fn default_provider_name(&self) -> Option<String> {
        self.registry.read().default_provider.clone()
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        self.executor.actions()
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerManager {
        self.executor.breakers()
    }

    /// Subscribe to lifecycle events from the built-in publisher. Events sent to
    /// a custom emitter do not appear here.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.publisher.subscribe()
    }

    fn emit(&self, name: &str, payload: Value) {
        self.events.emit(name, payload);
    }

    /// Validate `definition` and dispatch it to the named or default provider
    #[instrument(skip(self, definition, input), fields(workflow_id = %definition.id))]
    pub async fn execute_workflow(
        &self,
        definition: &WorkflowDefinition,
        input: Option<Value>,
        provider: Option<&str>,
    ) -> OrchestrationResult<WorkflowExecution> {
        definition.validate()?;

        if self.rate_limit.enabled {
            let pattern = self.rate_limit.pattern_for_workflow(&definition.id);
            self.rate_limiter.check_rate_limit(&pattern, None)?;
        }

        let provider = self.provider(provider, "execute_workflow")?;
        let execution = provider
            .execute(definition, input.unwrap_or_else(|| json!({})))
            .await?;

        log_execution_operation(
            "execute",
            Some(execution.id),
            Some(&definition.id),
            Some(provider.name()),
            &execution.status.to_string(),
            None,
        );
        self.emit(
            names::EXECUTION_STARTED,
            json!({
                "execution_id": execution.id,
                "workflow_id": definition.id,
                "provider": provider.name(),
            }),
        );
        Ok(execution)
    }

    pub async fn get_execution(
        &self,
        execution_id: Uuid,
        provider: Option<&str>,
    ) -> OrchestrationResult<Option<WorkflowExecution>> {
        self.provider(provider, "get_execution")?
            .get_execution(execution_id)
            .await
    }

    pub async fn list_executions(
        &self,
        workflow_id: &str,
        options: &ListExecutionsOptions,
        provider: Option<&str>,
    ) -> OrchestrationResult<Vec<WorkflowExecution>> {
        self.provider(provider, "list_executions")?
            .list_executions(workflow_id, options)
            .await
    }

    pub async fn cancel_execution(
        &self,
        execution_id: Uuid,
        provider: Option<&str>,
    ) -> OrchestrationResult<bool> {
        let provider = self.provider(provider, "cancel_execution")?;
        let cancelled = provider.cancel_execution(execution_id).await?;
        if cancelled {
            log_execution_operation(
                "cancel",
                Some(execution_id),
                None,
                Some(provider.name()),
                "cancelled",
                None,
            );
            self.emit(
                names::EXECUTION_CANCELLED,
                json!({ "execution_id": execution_id, "provider": provider.name() }),
            );
        }
        Ok(cancelled)
    }

    pub async fn schedule_workflow(
        &self,
        definition: &WorkflowDefinition,
        provider: Option<&str>,
    ) -> OrchestrationResult<String> {
        definition.validate()?;
        self.provider(provider, "schedule_workflow")?
            .schedule_workflow(definition)
            .await
    }

    pub async fn unschedule_workflow(
        &self,
        workflow_id: &str,
        provider: Option<&str>,
    ) -> OrchestrationResult<bool> {
        self.provider(provider, "unschedule_workflow")?
            .unschedule_workflow(workflow_id)
            .await
    }

    /// Process one delivered step message.
    ///
    /// Safe under at-least-once delivery: steps of terminal executions and
    /// steps that already completed never run their action again. A redelivered
    /// completed step re-dispatches its follow-ups, so a message lost between
    /// recording the result and enqueueing the next step is recovered; it
    /// reports `Skipped(AlreadyCompleted)` when there was nothing left to do.
    #[instrument(skip(self, message), fields(execution_id = %message.execution_id, step_id = %message.step_id))]
    pub async fn handle_step(&self, message: StepMessage) -> OrchestrationResult<StepOutcome> {
        let provider = self.provider(Some(&message.provider), "handle_step")?;
        let execution_id = message.execution_id;

        let execution = provider
            .get_execution(execution_id)
            .await?
            .ok_or(OrchestrationError::ExecutionNotFound { execution_id })?;

        if execution.status.is_terminal() {
            debug!(status = %execution.status, "Skipping step of terminal execution");
            return Ok(StepOutcome::Skipped(SkipReason::ExecutionTerminal(execution.status)));
        }
        if execution.is_step_completed(&message.step_id) {
            debug!("Duplicate delivery of completed step; re-dispatching follow-ups");
            return match self.advance(provider.as_ref(), &message, &execution).await? {
                StepOutcome::Waiting => Ok(StepOutcome::Skipped(SkipReason::AlreadyCompleted)),
                StepOutcome::Dispatched { next } if next.is_empty() => {
                    Ok(StepOutcome::Skipped(SkipReason::AlreadyCompleted))
                }
                outcome => Ok(outcome),
            };
        }

        let definition = &message.definition;
        let step = definition.step(&message.step_id).ok_or_else(|| {
            ValidationError::new(
                "step_id",
                format!(
                    "step '{}' is not part of workflow '{}'",
                    message.step_id, definition.id
                ),
            )
        })?;

        let context = StepContext::for_message(&message, step, &execution);
        let run = self.executor.execute(step, context.clone()).await;

        let current = provider
            .get_execution(execution_id)
            .await?
            .ok_or(OrchestrationError::ExecutionNotFound { execution_id })?;
        if current.status.is_terminal() {
            info!(
                status = %current.status,
                "Execution became terminal while the step ran; discarding its result"
            );
            return Ok(StepOutcome::Discarded);
        }

        let recorded = provider
            .record_step_result(execution_id, run.to_step_result())
            .await?;
        log_step_operation(
            "handle_step",
            execution_id,
            &step.id,
            run.attempts,
            if run.succeeded() { "completed" } else { "failed" },
            run.result.as_ref().err().map(ToString::to_string).as_deref(),
        );

        // A racing delivery completed this step first; its result stands
        if run.result.is_err() && recorded.is_step_completed(&step.id) {
            info!("Step completed by a concurrent delivery; ignoring this failure");
            return Ok(StepOutcome::Skipped(SkipReason::AlreadyCompleted));
        }

        match run.result {
            Ok(_) => {
                self.emit(
                    names::STEP_COMPLETED,
                    json!({
                        "execution_id": execution_id,
                        "step_id": step.id,
                        "attempts": run.attempts,
                    }),
                );
                self.advance(provider.as_ref(), &message, &recorded).await
            }
            Err(step_error) => {
                self.emit(
                    names::STEP_FAILED,
                    json!({
                        "execution_id": execution_id,
                        "step_id": step.id,
                        "attempts": run.attempts,
                        "error": step_error.to_string(),
                    }),
                );
                self.fail_execution(provider.as_ref(), &message, &recorded, &context, step_error)
                    .await
            }
        }
    }

    /// Enqueue whatever follows a completed step, or complete the execution
    async fn advance(
        &self,
        provider: &dyn WorkflowProvider,
        message: &StepMessage,
        execution: &WorkflowExecution,
    ) -> OrchestrationResult<StepOutcome> {
        let completed = execution.completed_step_ids();

        match message.definition.next_steps(&message.step_id, &completed) {
            NextSteps::Dispatch(steps) => {
                let now = self.clock.now();
                let mut next = Vec::with_capacity(steps.len());
                for step in steps.iter().filter(|s| !completed.contains(s.id.as_str())) {
                    let follow_up = StepMessage::new(
                        &message.provider,
                        message.execution_id,
                        &message.definition,
                        &step.id,
                        message.input.clone(),
                        now,
                    );
                    provider.enqueue_step(follow_up).await?;
                    next.push(step.id.clone());
                }
                Ok(StepOutcome::Dispatched { next })
            }
            NextSteps::Waiting => Ok(StepOutcome::Waiting),
            NextSteps::Finished => {
                match provider
                    .update_execution_status(message.execution_id, ExecutionEvent::Complete)
                    .await
                {
                    Ok(_) => {}
                    // A concurrent delivery finished or cancelled it first
                    Err(OrchestrationError::StateMachine(e)) => {
                        debug!(error = %e, "Execution already terminal at completion");
                        return Ok(StepOutcome::Discarded);
                    }
                    Err(e) => return Err(e),
                }

                log_execution_operation(
                    "complete",
                    Some(message.execution_id),
                    Some(&message.workflow_id),
                    Some(provider.name()),
                    "completed",
                    None,
                );
                self.emit(
                    names::EXECUTION_COMPLETED,
                    json!({
                        "execution_id": message.execution_id,
                        "workflow_id": message.workflow_id,
                        "step_results": execution.step_results.len(),
                    }),
                );
                Ok(StepOutcome::Completed)
            }
        }
    }

    /// Compensate completed steps newest first, then mark the execution failed
    async fn fail_execution(
        &self,
        provider: &dyn WorkflowProvider,
        message: &StepMessage,
        execution: &WorkflowExecution,
        context: &StepContext,
        step_error: OrchestrationError,
    ) -> OrchestrationResult<StepOutcome> {
        let completed: Vec<(String, (StepDefinition, Value))> = message
            .definition
            .steps
            .iter()
            .filter_map(|step| {
                let result = execution.step_result(&step.id)?;
                if !result.is_completed() {
                    return None;
                }
                let output = result.output.clone().unwrap_or(Value::Null);
                Some((step.id.clone(), (step.clone(), output)))
            })
            .collect();

        let executor = &self.executor;
        let compensation_errors = compensate_in_reverse(completed, |_, (step, output)| {
            let undo = step.compensation.clone().map(|action| {
                let mut undo_context = context.for_compensation(&action, output);
                undo_context.step_id = step.id.clone();
                (action, undo_context)
            });
            async move {
                match undo {
                    Some((action, undo_context)) => executor.compensate(&action, undo_context).await,
                    None => Ok(()),
                }
            }
        })
        .await;

        if !compensation_errors.is_empty() {
            provider
                .record_compensation_errors(message.execution_id, compensation_errors.clone())
                .await?;
        }

        let reason = step_error.to_string();
        match provider
            .update_execution_status(
                message.execution_id,
                ExecutionEvent::fail_with_error(reason.clone()),
            )
            .await
        {
            Ok(_) => {}
            Err(OrchestrationError::StateMachine(e)) => {
                warn!(error = %e, "Execution already terminal; failure not recorded");
            }
            Err(e) => return Err(e),
        }

        error!(
            workflow_id = %message.workflow_id,
            error = %reason,
            compensation_failures = compensation_errors.len(),
            "❌ Execution failed"
        );
        self.emit(
            names::EXECUTION_FAILED,
            json!({
                "execution_id": message.execution_id,
                "workflow_id": message.workflow_id,
                "step_id": message.step_id,
                "error": reason,
                "compensation_errors": compensation_errors,
            }),
        );

        Ok(StepOutcome::Failed {
            error: reason,
            compensation_errors,
        })
    }

    async fn check_provider(&self, provider: &dyn WorkflowProvider) -> HealthCheckResult {
        let started = Instant::now();
        match tokio::time::timeout(self.health_check_timeout, provider.health_check()).await {
            Ok(result) => result,
            Err(_) => HealthCheckResult::unhealthy(
                format!(
                    "health check timed out after {}ms",
                    self.health_check_timeout.as_millis()
                ),
                started.elapsed().as_millis() as u64,
                self.clock.now(),
            ),
        }
    }

    /// One record per provider. Never fails: a provider whose check hangs
    /// past the timeout is reported unhealthy.
    pub async fn health_check(&self) -> BTreeMap<String, HealthCheckResult> {
        let providers: Vec<(String, Arc<dyn WorkflowProvider>)> = {
            let registry = self.registry.read();
            registry
                .order
                .iter()
                .filter_map(|name| {
                    registry
                        .providers
                        .get(name)
                        .map(|provider| (name.clone(), Arc::clone(provider)))
                })
                .collect()
        };

        let checks = futures::future::join_all(providers.iter().map(|(name, provider)| async move {
            (name.clone(), self.check_provider(provider.as_ref()).await)
        }))
        .await;

        checks.into_iter().collect()
    }

    /// Release every provider and clear the registry
    pub async fn shutdown(&self) -> OrchestrationResult<()> {
        let providers: Vec<Arc<dyn WorkflowProvider>> = {
            let mut registry = self.registry.write();
            registry.initialized = false;
            registry.default_provider = None;
            registry.order.clear();
            registry.providers.drain().map(|(_, provider)| provider).collect()
        };

        for provider in &providers {
            if let Err(e) = provider.shutdown().await {
                warn!(provider = provider.name(), error = %e, "Provider shutdown failed");
            }
        }

        let tripped = self.executor.breakers().tripped_keys();
        if !tripped.is_empty() {
            warn!(breakers = ?tripped, "Circuit breakers still tripped at shutdown");
        }
        info!(providers = providers.len(), "Orchestration engine shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::InMemoryMessageQueue;
    use crate::persistence::InMemoryKeyValueStore;
    use crate::providers::HealthStatus;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition::new("wf1", "Order", "1.0.0")
            .with_step(StepDefinition::new("s1", "reserve"))
            .with_step(StepDefinition::new("s2", "charge"))
    }

    fn actions() -> Arc<ActionRegistry> {
        let actions = Arc::new(ActionRegistry::new());
        actions.register_fn("reserve", |_| async { Ok(json!({"hold": "h-1"})) });
        actions.register_fn("charge", |_| async { Ok(json!({"charge": "c-1"})) });
        actions
    }

    #[tokio::test]
    async fn test_calls_before_initialize_fail() {
        let engine = OrchestrationEngine::new(actions());
        engine.register("primary", ProviderConfig::memory()).unwrap();

        let result = engine.execute_workflow(&definition(), None, None).await;
        assert!(matches!(result, Err(OrchestrationError::NotInitialized { .. })));
    }

    #[tokio::test]
    async fn test_first_registration_becomes_default_unless_flagged() {
        let engine = OrchestrationEngine::new(actions());
        engine.register("first", ProviderConfig::memory()).unwrap();
        engine.register("second", ProviderConfig::memory()).unwrap();
        engine.initialize().await.unwrap();
        assert_eq!(engine.default_provider_name().as_deref(), Some("first"));

        let engine = OrchestrationEngine::new(actions());
        engine.register("first", ProviderConfig::memory()).unwrap();
        engine.register("second", ProviderConfig::memory().as_default()).unwrap();
        engine.initialize().await.unwrap();
        assert_eq!(engine.default_provider_name().as_deref(), Some("second"));
        assert_eq!(engine.provider_names(), vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_provider_type_fails_initialize() {
        let engine = OrchestrationEngine::new(actions());
        engine.register("primary", ProviderConfig::new("kafka")).unwrap();

        assert!(matches!(
            engine.initialize().await,
            Err(OrchestrationError::UnknownProviderType { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_definition_is_rejected_before_provider_lookup() {
        let engine = OrchestrationEngine::new(actions());
        let mut invalid = definition();
        invalid.version = "latest".to_string();

        // Not initialized either: validation must win
        let result = engine.execute_workflow(&invalid, None, None).await;
        assert!(matches!(result, Err(OrchestrationError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_provider_name() {
        let engine = OrchestrationEngine::new(actions());
        engine.register("primary", ProviderConfig::memory()).unwrap();
        engine.initialize().await.unwrap();

        let result = engine.execute_workflow(&definition(), None, Some("nope")).await;
        assert!(matches!(
            result,
            Err(OrchestrationError::ProviderNotFound { ref name }) if name == "nope"
        ));
    }

    #[tokio::test]
    async fn test_handle_step_drives_linear_workflow() {
        let queue = Arc::new(InMemoryMessageQueue::new());
        let engine = OrchestrationEngine::new(actions());
        engine
            .register(
                "primary",
                ProviderConfig::queue(Arc::new(InMemoryKeyValueStore::new()), queue.clone())
                    .with_queue_name("steps"),
            )
            .unwrap();
        engine.initialize().await.unwrap();

        let execution = engine
            .execute_workflow(&definition(), Some(json!({"order": 7})), None)
            .await
            .unwrap();

        let first = queue.pop("steps").unwrap().step_message().unwrap();
        assert_eq!(
            engine.handle_step(first.clone()).await.unwrap(),
            StepOutcome::Dispatched {
                next: vec!["s2".to_string()]
            }
        );
        // Redelivery never reruns s1 but dispatches s2 again
        assert_eq!(
            engine.handle_step(first.clone()).await.unwrap(),
            StepOutcome::Dispatched {
                next: vec!["s2".to_string()]
            }
        );
        assert_eq!(queue.len("steps"), 2);

        let second = queue.pop("steps").unwrap().step_message().unwrap();
        assert_eq!(engine.handle_step(second.clone()).await.unwrap(), StepOutcome::Completed);
        let duplicate = queue.pop("steps").unwrap().step_message().unwrap();
        assert_eq!(
            engine.handle_step(duplicate).await.unwrap(),
            StepOutcome::Skipped(SkipReason::ExecutionTerminal(ExecutionStatus::Completed))
        );
        assert_eq!(
            engine.handle_step(first).await.unwrap(),
            StepOutcome::Skipped(SkipReason::ExecutionTerminal(ExecutionStatus::Completed))
        );

        let finished = engine.get_execution(execution.id, None).await.unwrap().unwrap();
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(finished.step_results.len(), 2);
        assert!(finished.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_rate_limit_applies_per_workflow() {
        let engine = OrchestrationEngine::builder(actions())
            .rate_limit(RateLimitSettings {
                enabled: true,
                tokens: 1,
                ..RateLimitSettings::default()
            })
            .build();
        engine.register("primary", ProviderConfig::memory()).unwrap();
        engine.initialize().await.unwrap();

        engine.execute_workflow(&definition(), None, None).await.unwrap();
        let denied = engine.execute_workflow(&definition(), None, None).await;
        assert!(matches!(denied, Err(OrchestrationError::RateLimited(_))));
    }

    #[tokio::test]
    async fn test_health_check_and_shutdown() {
        let engine = OrchestrationEngine::new(actions());
        engine.register("primary", ProviderConfig::memory()).unwrap();
        engine
            .register(
                "degraded",
                ProviderConfig::new("queue").with_queue(Arc::new(InMemoryMessageQueue::new())),
            )
            .unwrap();
        engine.initialize().await.unwrap();

        let health = engine.health_check().await;
        assert_eq!(health["primary"].status, HealthStatus::Healthy);
        assert_eq!(health["degraded"].status, HealthStatus::Unhealthy);
        assert_eq!(
            health["degraded"].checks["store"].message.as_deref(),
            Some("not configured")
        );

        engine.shutdown().await.unwrap();
        assert!(engine.provider_names().is_empty());
        assert!(engine.health_check().await.is_empty());
        assert!(matches!(
            engine.get_execution(Uuid::new_v4(), None).await,
            Err(OrchestrationError::NotInitialized { .. })
        ));
    }
}
