use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::time::Duration;

/// A named, versioned sequence of steps.
///
/// Definitions are immutable once submitted: the engine only ever reads them, and
/// step messages carry a clone so the re-entry point can resume statelessly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    /// Semantic version of the definition
    pub version: String,
    pub steps: Vec<StepDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// Cron schedule attached to a definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// One step of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub name: String,
    /// Action id resolved through the engine's action registry
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Action id of the compensating action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Consecutive parallel steps are dispatched together
    #[serde(default)]
    pub parallel: bool,
}

/// Per-step retry settings overriding the engine default policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryOverride {
    pub max_attempts: u32,
    #[serde(default)]
    pub strategy: BackoffStrategy,
    pub delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    #[default]
    Exponential,
}

/// What to dispatch after a step completes
#[derive(Debug, Clone, PartialEq)]
pub enum NextSteps<'a> {
    /// Dispatch these steps (one, or a whole parallel run)
    Dispatch(&'a [StepDefinition]),
    /// Other steps of the current parallel run are still outstanding
    Waiting,
    /// Every step has completed
    Finished,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            steps: Vec::new(),
            schedule: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_schedule(mut self, cron: impl Into<String>, timezone: impl Into<String>) -> Self {
        self.schedule = Some(ScheduleSpec {
            cron: cron.into(),
            timezone: timezone.into(),
        });
        self
    }

    /// Validate the definition before dispatch.
    ///
    /// Checks non-empty id and name, a semver version, at least one step, unique
    /// non-empty step ids, non-empty action ids and a well-formed schedule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::new("id", "workflow id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "workflow name must not be empty"));
        }
        semver::Version::parse(&self.version).map_err(|e| {
            ValidationError::new(
                "version",
                format!("'{}' is not a semantic version: {e}", self.version),
            )
        })?;
        if self.steps.is_empty() {
            return Err(ValidationError::new(
                "steps",
                "workflow must declare at least one step",
            ));
        }

        let mut seen = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                return Err(ValidationError::new(
                    format!("steps[{index}].id"),
                    "step id must not be empty",
                ));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(ValidationError::new(
                    format!("steps[{index}].id"),
                    format!("duplicate step id '{}'", step.id),
                ));
            }
            if step.action.trim().is_empty() {
                return Err(ValidationError::new(
                    format!("steps[{index}].action"),
                    format!("step '{}' has no action", step.id),
                ));
            }
            if let Some(retry) = &step.retry {
                if retry.max_attempts == 0 {
                    return Err(ValidationError::new(
                        format!("steps[{index}].retry.max_attempts"),
                        "max_attempts must be at least 1",
                    ));
                }
            }
        }

        if let Some(schedule) = &self.schedule {
            schedule.validate()?;
        }

        Ok(())
    }

    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == step_id)
    }

    /// Index range of the dispatch group containing `index`.
    ///
    /// A non-parallel step is its own group; a parallel step belongs to the
    /// maximal run of consecutive parallel steps around it.
    pub fn dispatch_group(&self, index: usize) -> Range<usize> {
        if index >= self.steps.len() {
            return index..index;
        }
        if !self.steps[index].parallel {
            return index..index + 1;
        }

        let mut start = index;
        while start > 0 && self.steps[start - 1].parallel {
            start -= 1;
        }
        let mut end = index + 1;
        while end < self.steps.len() && self.steps[end].parallel {
            end += 1;
        }
        start..end
    }

    /// Steps dispatched when an execution starts
    pub fn initial_steps(&self) -> &[StepDefinition] {
        &self.steps[self.dispatch_group(0)]
    }

    /// Decide what follows the completion of `step_id`, given every completed step id
    pub fn next_steps<'a>(&'a self, step_id: &str, completed: &HashSet<&str>) -> NextSteps<'a> {
        if self.steps.iter().all(|step| completed.contains(step.id.as_str())) {
            return NextSteps::Finished;
        }

        let Some(index) = self.step_index(step_id) else {
            return NextSteps::Waiting;
        };
        let group = self.dispatch_group(index);
        let group_done = self.steps[group.clone()]
            .iter()
            .all(|step| completed.contains(step.id.as_str()));
        if !group_done {
            return NextSteps::Waiting;
        }

        let next = self.dispatch_group(group.end);
        if next.is_empty() {
            NextSteps::Finished
        } else {
            NextSteps::Dispatch(&self.steps[next])
        }
    }
}

impl ScheduleSpec {
    /// Minimal structural validation: five or six whitespace-separated cron fields
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields = self.cron.split_whitespace().count();
        if !(5..=6).contains(&fields) {
            return Err(ValidationError::new(
                "schedule.cron",
                format!(
                    "cron expression '{}' must have 5 or 6 fields, found {fields}",
                    self.cron
                ),
            ));
        }
        if self.timezone.trim().is_empty() {
            return Err(ValidationError::new(
                "schedule.timezone",
                "timezone must not be empty",
            ));
        }
        Ok(())
    }
}

impl StepDefinition {
    /// Step whose name matches its id
    pub fn new(id: impl Into<String>, action: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            action: action.into(),
            input_schema: None,
            compensation: None,
            retry: None,
            timeout_ms: None,
            parallel: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_compensation(mut self, action: impl Into<String>) -> Self {
        self.compensation = Some(action.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryOverride) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
