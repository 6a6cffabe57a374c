//! Saga assembly. [`SagaBuilder`] collects steps, hooks and metadata;
//! [`SagaBuilder::build`] freezes them into an immutable [`SagaDefinition`].

use super::{SagaContext, SagaResult, SagaStep};
use crate::error::{OrchestrationResult, ValidationError};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Callback run once after a saga's outcome is known. Errors are logged only.
pub type SagaHook = Arc<dyn Fn(&SagaResult, &SagaContext) -> Result<(), String> + Send + Sync>;

/// Frozen, reusable saga description
#[derive(Clone)]
pub struct SagaDefinition {
    pub id: String,
    pub name: String,
    pub steps: Vec<Arc<dyn SagaStep>>,
    pub on_success: Option<SagaHook>,
    pub on_failure: Option<SagaHook>,
    pub metadata: HashMap<String, Value>,
}

impl fmt::Debug for SagaDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &self.step_ids())
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl SagaDefinition {
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.id()).collect()
    }
}

pub struct SagaBuilder {
    id: String,
    name: String,
    steps: Vec<Arc<dyn SagaStep>>,
    on_success: Option<SagaHook>,
    on_failure: Option<SagaHook>,
    metadata: HashMap<String, Value>,
}

impl SagaBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
            on_success: None,
            on_failure: None,
            metadata: HashMap::new(),
        }
    }

    /// Append a step; steps run in the order they are added
    #[must_use]
    pub fn step<S: SagaStep + 'static>(mut self, step: S) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    #[must_use]
    pub fn shared_step(mut self, step: Arc<dyn SagaStep>) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SagaResult, &SagaContext) -> Result<(), String> + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SagaResult, &SagaContext) -> Result<(), String> + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Freeze the saga. Fails without steps or with duplicate step ids.
    pub fn build(self) -> OrchestrationResult<SagaDefinition> {
        if self.steps.is_empty() {
            return Err(ValidationError::new("steps", "saga must declare at least one step").into());
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id().trim().is_empty() {
                return Err(ValidationError::new("steps", "saga step id must not be empty").into());
            }
            if !seen.insert(step.id()) {
                return Err(ValidationError::new(
                    "steps",
                    format!("duplicate saga step id '{}'", step.id()),
                )
                .into());
            }
        }

        Ok(SagaDefinition {
            id: self.id,
            name: self.name,
            steps: self.steps,
            on_success: self.on_success,
            on_failure: self.on_failure,
            metadata: self.metadata,
        })
    }
}
