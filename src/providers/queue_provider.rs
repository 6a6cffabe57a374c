//! # Queue Workflow Provider
//!
//! Provider over a [`MessageQueue`] for step dispatch and a [`KeyValueStore`]
//! for execution and schedule records.
//!
//! Key layout, all under the configured prefix:
//!
//! | key                                   | value                              |
//! |---------------------------------------|------------------------------------|
//! | `{prefix}:execution:{id}`             | JSON [`WorkflowExecution`]         |
//! | `{prefix}:workflow:{wf}:executions`   | sorted set, score = start time ms  |
//! | `{prefix}:schedule:{id}`              | JSON [`ScheduleRecord`]            |
//! | `{prefix}:workflow:{wf}:schedules`    | sorted set, score = creation ms    |
//!
//! Record updates are read-modify-write. Concurrent writers on one execution id
//! are not serialized, so two deliveries of different steps racing on the same
//! execution can lose one result; callers that need strict ordering serialize
//! per execution id themselves.

use crate::error::{OrchestrationError, OrchestrationResult, ProviderError, ValidationError};
use crate::messaging::{MessageQueue, ScheduleRequest, StepMessage};
use crate::models::{
    CompensationErrorRecord, ListExecutionsOptions, StepResult, WorkflowDefinition,
    WorkflowExecution,
};
use crate::persistence::{KeyValueStore, KeyValueStoreExt};
use crate::providers::{DependencyCheck, HealthCheckResult, WorkflowProvider};
use crate::state_machine::{ExecutionEvent, ExecutionStateMachine};
use crate::utils::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Persisted schedule registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub schedule_id: String,
    pub workflow_id: String,
    pub cron: String,
    pub timezone: String,
    /// Id the message queue assigned to the recurring delivery
    pub queue_schedule_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct QueueWorkflowProvider {
    name: String,
    key_prefix: String,
    queue_name: String,
    store: Option<Arc<dyn KeyValueStore>>,
    queue: Option<Arc<dyn MessageQueue>>,
    clock: Arc<dyn Clock>,
}

impl QueueWorkflowProvider {
    pub fn new(
        name: impl Into<String>,
        key_prefix: impl Into<String>,
        queue_name: impl Into<String>,
        store: Option<Arc<dyn KeyValueStore>>,
        queue: Option<Arc<dyn MessageQueue>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let provider = Self {
            name: name.into(),
            key_prefix: key_prefix.into(),
            queue_name: queue_name.into(),
            store,
            queue,
            clock,
        };

        if provider.store.is_none() {
            warn!(
                provider = %provider.name,
                "⚠️ Provider has no persistence store; running in degraded mode"
            );
        }
        provider
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn execution_key(&self, execution_id: Uuid) -> String {
        format!("{}:execution:{}", self.key_prefix, execution_id)
    }

    fn executions_index_key(&self, workflow_id: &str) -> String {
        format!("{}:workflow:{}:executions", self.key_prefix, workflow_id)
    }

    fn schedule_key(&self, schedule_id: &str) -> String {
        format!("{}:schedule:{}", self.key_prefix, schedule_id)
    }

    fn schedules_index_key(&self, workflow_id: &str) -> String {
        format!("{}:workflow:{}:schedules", self.key_prefix, workflow_id)
    }

    fn require_store(&self, operation: &str) -> OrchestrationResult<&Arc<dyn KeyValueStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| OrchestrationError::NotConfigured {
                provider: self.name.clone(),
                dependency: "store".to_string(),
                operation: operation.to_string(),
            })
    }

    fn require_queue(&self, operation: &str) -> OrchestrationResult<&Arc<dyn MessageQueue>> {
        self.queue
            .as_ref()
            .ok_or_else(|| OrchestrationError::NotConfigured {
                provider: self.name.clone(),
                dependency: "queue".to_string(),
                operation: operation.to_string(),
            })
    }

    /// Wrap backend failures as provider errors; engine-level errors pass through
    fn backend_error(&self, operation: &str, error: OrchestrationError) -> OrchestrationError {
        match error {
            OrchestrationError::Provider(_)
            | OrchestrationError::Validation(_)
            | OrchestrationError::StateMachine(_)
            | OrchestrationError::NotConfigured { .. }
            | OrchestrationError::ExecutionNotFound { .. } => error,
            other => ProviderError::new(&self.name, operation, other.to_string()).into(),
        }
    }

    async fn load(
        &self,
        store: &Arc<dyn KeyValueStore>,
        execution_id: Uuid,
        operation: &str,
    ) -> OrchestrationResult<Option<WorkflowExecution>> {
        store
            .get_json(&self.execution_key(execution_id))
            .await
            .map_err(|e| self.backend_error(operation, e))
    }

    async fn load_existing(
        &self,
        store: &Arc<dyn KeyValueStore>,
        execution_id: Uuid,
        operation: &str,
    ) -> OrchestrationResult<WorkflowExecution> {
        self.load(store, execution_id, operation)
            .await?
            .ok_or(OrchestrationError::ExecutionNotFound { execution_id })
    }

    async fn save(
        &self,
        store: &Arc<dyn KeyValueStore>,
        execution: &WorkflowExecution,
        operation: &str,
    ) -> OrchestrationResult<()> {
        store
            .set_json(&self.execution_key(execution.id), execution)
            .await
            .map_err(|e| self.backend_error(operation, e))
    }

    /// Mark a just-started execution failed when its first steps could not be
    /// dispatched, so it is not left running with nothing in flight
    async fn abandon(&self, execution: &mut WorkflowExecution, error: &OrchestrationError) {
        let Some(store) = &self.store else {
            return;
        };
        let event = ExecutionEvent::fail_with_error(format!("initial dispatch failed: {error}"));
        if let Err(e) = ExecutionStateMachine::apply(execution, &event, self.clock.now()) {
            warn!(provider = %self.name, execution_id = %execution.id, error = %e, "Could not fail undispatched execution");
            return;
        }
        if let Err(e) = self.save(store, execution, "execute").await {
            warn!(
                provider = %self.name,
                execution_id = %execution.id,
                error = %e,
                "Could not persist failure of undispatched execution"
            );
        }
    }

    /// Read-modify-write of one execution record
    async fn update<F>(
        &self,
        execution_id: Uuid,
        operation: &str,
        mutate: F,
    ) -> OrchestrationResult<WorkflowExecution>
    where
        F: FnOnce(&mut WorkflowExecution, DateTime<Utc>) -> OrchestrationResult<()> + Send,
    {
        let store = self.require_store(operation)?;
        let mut execution = self.load_existing(store, execution_id, operation).await?;
        mutate(&mut execution, self.clock.now())?;
        self.save(store, &execution, operation).await?;
        Ok(execution)
    }
}

#[async_trait]
impl WorkflowProvider for QueueWorkflowProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
    ) -> OrchestrationResult<WorkflowExecution> {
        let queue = self.require_queue("execute")?;
        let now = self.clock.now();

        let mut execution =
            WorkflowExecution::for_definition(definition, &self.name, input.clone(), now);
        ExecutionStateMachine::apply(&mut execution, &ExecutionEvent::Start, now)?;

        match &self.store {
            Some(store) => {
                self.save(store, &execution, "execute").await?;
                store
                    .sorted_add(
                        &self.executions_index_key(&definition.id),
                        &execution.id.to_string(),
                        now.timestamp_millis(),
                    )
                    .await
                    .map_err(|e| self.backend_error("execute", e))?;
            }
            None => warn!(
                provider = %self.name,
                execution_id = %execution.id,
                "⚠️ Execution is not persisted (no store configured)"
            ),
        }

        for step in definition.initial_steps() {
            let message = StepMessage::new(&self.name, execution.id, definition, &step.id, input.clone(), now);
            let published = match message.to_json() {
                Ok(body) => queue.publish(&self.queue_name, body).await,
                Err(e) => Err(OrchestrationError::from(e)),
            };
            if let Err(e) = published {
                let error = self.backend_error("execute", e);
                self.abandon(&mut execution, &error).await;
                return Err(error);
            }
        }

        info!(
            provider = %self.name,
            execution_id = %execution.id,
            workflow_id = %definition.id,
            dispatched = definition.initial_steps().len(),
            "🚀 Execution started"
        );
        Ok(execution)
    }

    async fn get_execution(
        &self,
        execution_id: Uuid,
    ) -> OrchestrationResult<Option<WorkflowExecution>> {
        let store = self.require_store("get_execution")?;
        self.load(store, execution_id, "get_execution").await
    }

    async fn list_executions(
        &self,
        workflow_id: &str,
        options: &ListExecutionsOptions,
    ) -> OrchestrationResult<Vec<WorkflowExecution>> {
        let store = self.require_store("list_executions")?;

        // A status filter has to look past `limit` index entries
        let index_limit = if options.status.is_some() {
            None
        } else {
            options.limit
        };
        let ids = store
            .sorted_range_desc(&self.executions_index_key(workflow_id), index_limit)
            .await
            .map_err(|e| self.backend_error("list_executions", e))?;

        let mut executions = Vec::new();
        for id in ids {
            if options.limit.is_some_and(|limit| executions.len() >= limit) {
                break;
            }
            let Ok(execution_id) = Uuid::parse_str(&id) else {
                warn!(workflow_id = workflow_id, member = %id, "Skipping malformed index entry");
                continue;
            };
            let Some(execution) = self.load(store, execution_id, "list_executions").await? else {
                continue;
            };
            if options.status.is_some_and(|status| execution.status != status) {
                continue;
            }
            executions.push(execution);
        }

        Ok(executions)
    }

    async fn cancel_execution(&self, execution_id: Uuid) -> OrchestrationResult<bool> {
        let store = self.require_store("cancel_execution")?;
        let Some(mut execution) = self.load(store, execution_id, "cancel_execution").await? else {
            return Ok(false);
        };
        if execution.status.is_terminal() {
            debug!(
                execution_id = %execution_id,
                status = %execution.status,
                "Cancel ignored for terminal execution"
            );
            return Ok(false);
        }

        ExecutionStateMachine::apply(&mut execution, &ExecutionEvent::Cancel, self.clock.now())?;
        self.save(store, &execution, "cancel_execution").await?;
        info!(provider = %self.name, execution_id = %execution_id, "🛑 Execution cancelled");
        Ok(true)
    }

    async fn schedule_workflow(
        &self,
        definition: &WorkflowDefinition,
    ) -> OrchestrationResult<String> {
        let Some(schedule) = &definition.schedule else {
            return Err(ValidationError::new(
                "schedule",
                format!(
                    "workflow '{}' has no schedule; set a cron schedule before calling schedule_workflow",
                    definition.id
                ),
            )
            .into());
        };
        let queue = self.require_queue("schedule_workflow")?;
        let now = self.clock.now();

        let queue_schedule_id = queue
            .create_schedule(ScheduleRequest {
                queue: self.queue_name.clone(),
                cron: schedule.cron.clone(),
                timezone: schedule.timezone.clone(),
                body: json!({
                    "provider": self.name,
                    "workflow_id": definition.id,
                    "definition": definition,
                }),
            })
            .await
            .map_err(|e| self.backend_error("schedule_workflow", e))?;

        let record = ScheduleRecord {
            schedule_id: Uuid::new_v4().to_string(),
            workflow_id: definition.id.clone(),
            cron: schedule.cron.clone(),
            timezone: schedule.timezone.clone(),
            queue_schedule_id,
            created_at: now,
        };

        if let Some(store) = &self.store {
            store
                .set_json(&self.schedule_key(&record.schedule_id), &record)
                .await
                .map_err(|e| self.backend_error("schedule_workflow", e))?;
            store
                .sorted_add(
                    &self.schedules_index_key(&definition.id),
                    &record.schedule_id,
                    now.timestamp_millis(),
                )
                .await
                .map_err(|e| self.backend_error("schedule_workflow", e))?;
        }

        info!(
            provider = %self.name,
            workflow_id = %definition.id,
            schedule_id = %record.schedule_id,
            cron = %record.cron,
            "⏰ Workflow scheduled"
        );
        Ok(record.schedule_id)
    }

    async fn unschedule_workflow(&self, workflow_id: &str) -> OrchestrationResult<bool> {
        let store = self.require_store("unschedule_workflow")?;
        let index_key = self.schedules_index_key(workflow_id);
        let schedule_ids = store
            .sorted_range_desc(&index_key, None)
            .await
            .map_err(|e| self.backend_error("unschedule_workflow", e))?;
        if schedule_ids.is_empty() {
            return Ok(false);
        }

        for schedule_id in &schedule_ids {
            let record: Option<ScheduleRecord> = store
                .get_json(&self.schedule_key(schedule_id))
                .await
                .map_err(|e| self.backend_error("unschedule_workflow", e))?;
            if let (Some(record), Some(queue)) = (record, &self.queue) {
                queue
                    .delete_schedule(&record.queue_schedule_id)
                    .await
                    .map_err(|e| self.backend_error("unschedule_workflow", e))?;
            }
            store
                .delete(&self.schedule_key(schedule_id))
                .await
                .map_err(|e| self.backend_error("unschedule_workflow", e))?;
            store
                .sorted_remove(&index_key, schedule_id)
                .await
                .map_err(|e| self.backend_error("unschedule_workflow", e))?;
        }

        info!(
            provider = %self.name,
            workflow_id = workflow_id,
            removed = schedule_ids.len(),
            "Workflow unscheduled"
        );
        Ok(true)
    }

    async fn update_execution_status(
        &self,
        execution_id: Uuid,
        event: ExecutionEvent,
    ) -> OrchestrationResult<WorkflowExecution> {
        self.update(execution_id, "update_execution_status", |execution, now| {
            ExecutionStateMachine::apply(execution, &event, now)?;
            Ok(())
        })
        .await
    }

    async fn record_step_result(
        &self,
        execution_id: Uuid,
        result: StepResult,
    ) -> OrchestrationResult<WorkflowExecution> {
        self.update(execution_id, "record_step_result", |execution, _| {
            if !execution.has_step(&result.step_id) {
                return Err(ValidationError::new(
                    "step_id",
                    format!(
                        "step '{}' is not part of workflow '{}'",
                        result.step_id, execution.workflow_id
                    ),
                )
                .into());
            }
            if !execution.upsert_step_result(result) {
                debug!(
                    provider = %self.name,
                    execution_id = %execution_id,
                    "Step already completed; keeping its recorded result"
                );
            }
            Ok(())
        })
        .await
    }

    async fn record_compensation_errors(
        &self,
        execution_id: Uuid,
        errors: Vec<CompensationErrorRecord>,
    ) -> OrchestrationResult<WorkflowExecution> {
        self.update(execution_id, "record_compensation_errors", |execution, _| {
            execution.compensation_errors.extend(errors);
            Ok(())
        })
        .await
    }

    async fn enqueue_step(&self, message: StepMessage) -> OrchestrationResult<String> {
        let queue = self.require_queue("enqueue_step")?;
        let step_id = message.step_id.clone();
        let execution_id = message.execution_id;

        let message_id = queue
            .publish(&self.queue_name, message.to_json()?)
            .await
            .map_err(|e| self.backend_error("enqueue_step", e))?;

        debug!(
            provider = %self.name,
            execution_id = %execution_id,
            step_id = %step_id,
            message_id = %message_id,
            "Step enqueued"
        );
        Ok(message_id)
    }

    async fn health_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let mut checks = BTreeMap::new();

        let store_check = match &self.store {
            Some(store) => match store.ping().await {
                Ok(()) => DependencyCheck::healthy(),
                Err(e) => DependencyCheck::unhealthy(e.to_string()),
            },
            None => DependencyCheck::not_configured(),
        };
        checks.insert("store".to_string(), store_check);

        let queue_check = match &self.queue {
            Some(queue) => match queue.ping().await {
                Ok(()) => DependencyCheck::healthy(),
                Err(e) => DependencyCheck::unhealthy(e.to_string()),
            },
            None => DependencyCheck::not_configured(),
        };
        checks.insert("queue".to_string(), queue_check);

        HealthCheckResult::from_checks(
            checks,
            started.elapsed().as_millis() as u64,
            self.clock.now(),
        )
    }

    async fn shutdown(&self) -> OrchestrationResult<()> {
        info!(provider = %self.name, "Provider shut down");
        Ok(())
    }
}
