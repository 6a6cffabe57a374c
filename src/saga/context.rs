//! Per-run saga context and the result-store capability it carries.

use crate::error::OrchestrationResult;
use crate::events::{EventEmitter, NoopEmitter};
use crate::persistence::{KeyValueStore, KeyValueStoreExt};
use crate::utils::{Clock, SystemClock};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::Span;
use uuid::Uuid;

/// Where step outputs are kept during a saga run
#[async_trait]
pub trait ResultStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, step_id: &str) -> OrchestrationResult<Option<Value>>;

    async fn set(&self, step_id: &str, output: Value) -> OrchestrationResult<()>;
}

/// Result store local to one run
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    values: RwLock<Map<String, Value>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.values.read().clone()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn get(&self, step_id: &str) -> OrchestrationResult<Option<Value>> {
        Ok(self.values.read().get(step_id).cloned())
    }

    async fn set(&self, step_id: &str, output: Value) -> OrchestrationResult<()> {
        self.values.write().insert(step_id.to_string(), output);
        Ok(())
    }
}

/// Result store persisting outputs under `{prefix}:saga:{execution_id}:{step_id}`
#[derive(Debug, Clone)]
pub struct KeyValueResultStore {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    execution_id: Uuid,
}

impl KeyValueResultStore {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>, execution_id: Uuid) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            execution_id,
        }
    }

    fn key(&self, step_id: &str) -> String {
        format!("{}:saga:{}:{}", self.prefix, self.execution_id, step_id)
    }
}

#[async_trait]
impl ResultStore for KeyValueResultStore {
    async fn get(&self, step_id: &str) -> OrchestrationResult<Option<Value>> {
        self.store.get_json(&self.key(step_id)).await
    }

    async fn set(&self, step_id: &str, output: Value) -> OrchestrationResult<()> {
        self.store.set_json(&self.key(step_id), &output).await
    }
}

/// Capabilities handed to every step and compensation of one saga run
#[derive(Debug, Clone)]
pub struct SagaContext {
    pub execution_id: Uuid,
    pub saga_id: String,
    pub input: Value,
    pub results: Arc<dyn ResultStore>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventEmitter>,
    pub span: Span,
}

impl SagaContext {
    /// Context with an in-memory result store, the wall clock and no event sink
    pub fn new(saga_id: impl Into<String>, input: Value) -> Self {
        let saga_id = saga_id.into();
        let execution_id = Uuid::new_v4();
        Self {
            span: tracing::info_span!("saga", saga_id = %saga_id, execution_id = %execution_id),
            execution_id,
            saga_id,
            input,
            results: Arc::new(InMemoryResultStore::new()),
            clock: Arc::new(SystemClock),
            events: Arc::new(NoopEmitter),
        }
    }

    pub fn with_results(mut self, results: Arc<dyn ResultStore>) -> Self {
        self.results = results;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = events;
        self
    }

    /// Output of an earlier step
    pub async fn result(&self, step_id: &str) -> OrchestrationResult<Option<Value>> {
        self.results.get(step_id).await
    }

    pub fn emit(&self, name: &str, mut payload: Value) {
        if let Value::Object(fields) = &mut payload {
            fields.insert("saga_id".to_string(), Value::String(self.saga_id.clone()));
            fields.insert(
                "execution_id".to_string(),
                Value::String(self.execution_id.to_string()),
            );
        }
        self.events.emit(name, payload);
    }
}
