//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use stepflow_core::error::{OrchestrationError, OrchestrationResult};
use stepflow_core::execution::{ActionRegistry, StepContext};
use std::sync::atomic::{AtomicU32, Ordering};
use stepflow_core::messaging::{InMemoryMessageQueue, MessageQueue, ScheduleRequest};
use stepflow_core::orchestration::{OrchestrationEngine, StepOutcome};
use stepflow_core::persistence::{InMemoryKeyValueStore, KeyValueStore};
use stepflow_core::providers::ProviderConfig;

pub const QUEUE: &str = "test_steps";

/// Engine wired to one queue provider named "primary" over in-memory backends
pub struct Harness {
    pub engine: Arc<OrchestrationEngine>,
    pub store: Arc<InMemoryKeyValueStore>,
    pub queue: Arc<InMemoryMessageQueue>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub async fn new(actions: Arc<ActionRegistry>, calls: Arc<Mutex<Vec<String>>>) -> Self {
        Self::with_engine(OrchestrationEngine::new(actions), calls).await
    }

    pub async fn with_engine(engine: OrchestrationEngine, calls: Arc<Mutex<Vec<String>>>) -> Self {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let queue = Arc::new(InMemoryMessageQueue::new());
        engine
            .register(
                "primary",
                ProviderConfig::queue(store.clone(), queue.clone()).with_queue_name(QUEUE),
            )
            .expect("register provider");
        engine.initialize().await.expect("initialize engine");

        Self {
            engine: Arc::new(engine),
            store,
            queue,
            calls,
        }
    }

    /// Deliver queued step messages until the queue is empty
    pub async fn pump(&self) -> Vec<StepOutcome> {
        let mut outcomes = Vec::new();
        while let Some(queued) = self.queue.pop(QUEUE) {
            let message = queued.step_message().expect("step message body");
            outcomes.push(self.engine.handle_step(message).await.expect("handle step"));
        }
        outcomes
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

/// Register `id` as an action that records its invocation and returns `output`
pub fn recording_action(
    actions: &ActionRegistry,
    calls: &Arc<Mutex<Vec<String>>>,
    id: &str,
    output: Value,
) {
    let calls = calls.clone();
    let name = id.to_string();
    actions.register_fn(id, move |_ctx: StepContext| {
        calls.lock().push(name.clone());
        let output = output.clone();
        async move { Ok(output) }
    });
}

/// Register `id` as an action that records its invocation and always fails
pub fn failing_action(actions: &ActionRegistry, calls: &Arc<Mutex<Vec<String>>>, id: &str, reason: &str) {
    let calls = calls.clone();
    let name = id.to_string();
    let reason = reason.to_string();
    actions.register_fn(id, move |ctx: StepContext| {
        calls.lock().push(name.clone());
        let error = OrchestrationError::step_failed(ctx.step_id, reason.clone());
        async move { Err(error) }
    });
}

pub fn new_calls() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn order_input() -> Value {
    json!({ "order_id": 42, "amount": 100 })
}

/// Store whose every operation fails, for exercising provider error paths
#[derive(Debug, Default)]
pub struct FailingStore;

fn unavailable() -> OrchestrationError {
    OrchestrationError::Network("store unavailable".to_string())
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> OrchestrationResult<Option<String>> {
        Err(unavailable())
    }

    async fn set(&self, _key: &str, _value: String) -> OrchestrationResult<()> {
        Err(unavailable())
    }

    async fn delete(&self, _key: &str) -> OrchestrationResult<bool> {
        Err(unavailable())
    }

    async fn sorted_add(&self, _key: &str, _member: &str, _score: i64) -> OrchestrationResult<()> {
        Err(unavailable())
    }

    async fn sorted_remove(&self, _key: &str, _member: &str) -> OrchestrationResult<bool> {
        Err(unavailable())
    }

    async fn sorted_range_desc(
        &self,
        _key: &str,
        _limit: Option<usize>,
    ) -> OrchestrationResult<Vec<String>> {
        Err(unavailable())
    }

    async fn ping(&self) -> OrchestrationResult<()> {
        Err(unavailable())
    }
}

/// In-memory queue that rejects exactly one publish, counted from 1
#[derive(Debug)]
pub struct FlakyQueue {
    pub inner: InMemoryMessageQueue,
    fail_on: u32,
    publishes: AtomicU32,
}

impl FlakyQueue {
    pub fn failing_publish(fail_on: u32) -> Self {
        Self {
            inner: InMemoryMessageQueue::new(),
            fail_on,
            publishes: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl MessageQueue for FlakyQueue {
    async fn publish(&self, queue: &str, body: Value) -> OrchestrationResult<String> {
        if self.publishes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(OrchestrationError::Network("publish failed".to_string()));
        }
        self.inner.publish(queue, body).await
    }

    async fn create_schedule(&self, request: ScheduleRequest) -> OrchestrationResult<String> {
        self.inner.create_schedule(request).await
    }

    async fn delete_schedule(&self, schedule_id: &str) -> OrchestrationResult<bool> {
        self.inner.delete_schedule(schedule_id).await
    }

    async fn ping(&self) -> OrchestrationResult<()> {
        self.inner.ping().await
    }
}
