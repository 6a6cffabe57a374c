//! Step actions and the registry the engine resolves them through.

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::execution::StepContext;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Work performed by one step (or undone by one compensation).
///
/// Actions must tolerate redelivery: under at-least-once dispatch the same
/// step can run more than once.
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn execute(&self, context: &StepContext) -> OrchestrationResult<Value>;
}

type ActionFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, OrchestrationResult<Value>> + Send + Sync>;

/// Action built from a closure
#[derive(Clone)]
pub struct FnStepAction {
    handler: ActionFn,
}

impl FnStepAction {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OrchestrationResult<Value>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |context| Box::pin(handler(context))),
        }
    }
}

impl fmt::Debug for FnStepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStepAction").finish_non_exhaustive()
    }
}

#[async_trait]
impl StepAction for FnStepAction {
    async fn execute(&self, context: &StepContext) -> OrchestrationResult<Value> {
        (self.handler)(context.clone()).await
    }
}

/// Action ids to implementations. Populated at startup, read on every step.
#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, Arc<dyn StepAction>>>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.action_ids())
            .finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `action` under `id`, replacing any previous registration
    pub fn register(&self, id: impl Into<String>, action: Arc<dyn StepAction>) {
        let id = id.into();
        if self.actions.write().insert(id.clone(), action).is_some() {
            warn!(action = %id, "Replaced existing action registration");
        } else {
            debug!(action = %id, "Registered action");
        }
    }

    pub fn register_fn<F, Fut>(&self, id: impl Into<String>, handler: F)
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OrchestrationResult<Value>> + Send + 'static,
    {
        self.register(id, Arc::new(FnStepAction::new(handler)));
    }

    pub fn get(&self, id: &str) -> OrchestrationResult<Arc<dyn StepAction>> {
        self.actions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestrationError::ActionNotFound {
                action: id.to_string(),
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actions.read().contains_key(id)
    }

    pub fn action_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.actions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.actions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepDefinition;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_registered_closure_runs() {
        let registry = ActionRegistry::new();
        registry.register_fn("echo", |ctx: StepContext| async move {
            Ok(json!({ "step": ctx.step_id, "input": ctx.input }))
        });

        let context = StepContext::new(
            Uuid::new_v4(),
            "wf1",
            &StepDefinition::new("s1", "echo"),
            json!(5),
        );
        let output = registry.get("echo").unwrap().execute(&context).await.unwrap();
        assert_eq!(output, json!({ "step": "s1", "input": 5 }));
        assert_eq!(registry.action_ids(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_missing_action_is_an_error() {
        let registry = ActionRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(OrchestrationError::ActionNotFound { ref action }) if action == "nope"
        ));
        assert!(registry.is_empty());
    }
}
