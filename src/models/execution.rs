use crate::models::WorkflowDefinition;
use crate::state_machine::{ExecutionStatus, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

/// Mutable record of one workflow run, owned by the provider that created it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: String,
    /// Name of the provider that owns this execution
    pub provider: String,
    pub status: ExecutionStatus,
    pub input: Value,
    /// Step ids of the definition this execution runs, in declared order
    #[serde(default)]
    pub step_ids: Vec<String>,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compensation_errors: Vec<CompensationErrorRecord>,
}

/// Result of one step attempt cycle (all retries included)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A compensation that failed while rolling back a failed execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationErrorRecord {
    pub step_id: String,
    pub error: String,
}

/// Filters for listing executions of one workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListExecutionsOptions {
    pub status: Option<ExecutionStatus>,
    pub limit: Option<usize>,
}

impl ListExecutionsOptions {
    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl WorkflowExecution {
    /// New pending execution with a fresh id
    pub fn new(
        workflow_id: impl Into<String>,
        provider: impl Into<String>,
        input: Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            provider: provider.into(),
            status: ExecutionStatus::Pending,
            input,
            step_ids: Vec::new(),
            step_results: Vec::new(),
            started_at,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            error: None,
            compensation_errors: Vec::new(),
        }
    }

    /// New pending execution of `definition`
    pub fn for_definition(
        definition: &WorkflowDefinition,
        provider: impl Into<String>,
        input: Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut execution = Self::new(definition.id.clone(), provider, input, started_at);
        execution.step_ids = definition.steps.iter().map(|step| step.id.clone()).collect();
        execution
    }

    pub fn has_step(&self, step_id: &str) -> bool {
        self.step_ids.iter().any(|id| id == step_id)
    }

    pub fn step_result(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.iter().find(|r| r.step_id == step_id)
    }

    pub fn is_step_completed(&self, step_id: &str) -> bool {
        self.step_result(step_id)
            .is_some_and(|r| r.status.satisfies_dependencies())
    }

    pub fn completed_step_ids(&self) -> HashSet<&str> {
        self.step_results
            .iter()
            .filter(|r| r.status.satisfies_dependencies())
            .map(|r| r.step_id.as_str())
            .collect()
    }

    /// Insert or replace the result for `result.step_id`.
    ///
    /// Keeps at most one entry per step, so redelivered steps never grow the list.
    /// A completed result is final: returns `false` and leaves it untouched.
    pub fn upsert_step_result(&mut self, result: StepResult) -> bool {
        match self
            .step_results
            .iter_mut()
            .find(|existing| existing.step_id == result.step_id)
        {
            Some(existing) if existing.is_completed() => false,
            Some(existing) => {
                *existing = result;
                true
            }
            None => {
                self.step_results.push(result);
                true
            }
        }
    }
}

impl StepResult {
    pub fn completed(
        step_id: impl Into<String>,
        output: Value,
        attempts: u32,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Completed,
            output: Some(output),
            error: None,
            attempts,
            started_at,
            finished_at,
        }
    }

    pub fn failed(
        step_id: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Failed,
            output: None,
            error: Some(error.into()),
            attempts,
            started_at,
            finished_at,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status.satisfies_dependencies()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_replaces_existing_result() {
        let now = Utc::now();
        let mut execution = WorkflowExecution::new("wf1", "primary", json!({}), now);

        execution.upsert_step_result(StepResult::failed("s1", "boom", 1, now, now));
        execution.upsert_step_result(StepResult::completed("s1", json!({"ok": true}), 2, now, now));

        assert_eq!(execution.step_results.len(), 1);
        assert!(execution.is_step_completed("s1"));
        assert_eq!(execution.step_result("s1").unwrap().attempts, 2);
    }

    #[test]
    fn test_completed_result_is_never_replaced() {
        let now = Utc::now();
        let mut execution = WorkflowExecution::new("wf1", "primary", json!({}), now);

        assert!(execution.upsert_step_result(StepResult::completed("s1", json!(1), 1, now, now)));
        assert!(!execution.upsert_step_result(StepResult::failed("s1", "late failure", 3, now, now)));
        assert!(!execution.upsert_step_result(StepResult::completed("s1", json!(2), 1, now, now)));

        let kept = execution.step_result("s1").unwrap();
        assert!(kept.is_completed());
        assert_eq!(kept.output, Some(json!(1)));
        assert!(kept.error.is_none());
    }

    #[test]
    fn test_for_definition_tracks_step_ids() {
        use crate::models::StepDefinition;

        let definition = WorkflowDefinition::new("wf1", "Order", "1.0.0")
            .with_step(StepDefinition::new("s1", "reserve"))
            .with_step(StepDefinition::new("s2", "charge"));
        let execution =
            WorkflowExecution::for_definition(&definition, "primary", json!({}), Utc::now());

        assert_eq!(execution.workflow_id, "wf1");
        assert!(execution.has_step("s2"));
        assert!(!execution.has_step("s3"));
        assert!(execution.step_results.is_empty());
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let now = Utc::now();
        let mut execution = WorkflowExecution::new("wf1", "primary", json!({"order": 7}), now);
        execution.upsert_step_result(StepResult::completed("s1", json!(1), 1, now, now));

        let raw = serde_json::to_string(&execution).unwrap();
        assert!(!raw.contains("cancelled_at"));
        let parsed: WorkflowExecution = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, execution);
    }
}
