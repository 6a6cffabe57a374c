//! # Message Queue
//!
//! Publish and schedule capability used by the queue-backed provider.
//! [`InMemoryMessageQueue`] keeps everything in process and lets callers drain
//! queues themselves, which is how tests and embedded deployments drive
//! execution forward.

use crate::error::OrchestrationResult;
use crate::messaging::StepMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tracing::debug;
use uuid::Uuid;

/// Recurring delivery of `body` to `queue`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub queue: String,
    pub cron: String,
    pub timezone: String,
    pub body: Value,
}

/// A message sitting in a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub body: Value,
    pub published_at: DateTime<Utc>,
}

impl QueuedMessage {
    /// Decode the body as a step message
    pub fn step_message(&self) -> Result<StepMessage, serde_json::Error> {
        StepMessage::from_json(self.body.clone())
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync + std::fmt::Debug {
    /// Publish `body` to `queue`, returning the message id
    async fn publish(&self, queue: &str, body: Value) -> OrchestrationResult<String>;

    /// Register a recurring delivery, returning the queue-side schedule id
    async fn create_schedule(&self, request: ScheduleRequest) -> OrchestrationResult<String>;

    /// Returns whether the schedule existed
    async fn delete_schedule(&self, schedule_id: &str) -> OrchestrationResult<bool>;

    async fn ping(&self) -> OrchestrationResult<()>;
}

#[derive(Debug, Default)]
struct QueueState {
    queues: HashMap<String, VecDeque<QueuedMessage>>,
    schedules: HashMap<String, ScheduleRequest>,
}

/// Process-local [`MessageQueue`]
#[derive(Debug, Default)]
pub struct InMemoryMessageQueue {
    state: Mutex<QueueState>,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest message from `queue`
    pub fn pop(&self, queue: &str) -> Option<QueuedMessage> {
        self.state.lock().queues.get_mut(queue)?.pop_front()
    }

    pub fn len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    pub fn schedule(&self, schedule_id: &str) -> Option<ScheduleRequest> {
        self.state.lock().schedules.get(schedule_id).cloned()
    }

    pub fn schedule_count(&self) -> usize {
        self.state.lock().schedules.len()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish(&self, queue: &str, body: Value) -> OrchestrationResult<String> {
        let message = QueuedMessage {
            id: Uuid::new_v4().to_string(),
            body,
            published_at: Utc::now(),
        };
        let id = message.id.clone();

        let mut state = self.state.lock();
        let pending = state.queues.entry(queue.to_string()).or_default();
        pending.push_back(message);
        debug!(queue = queue, message_id = %id, depth = pending.len(), "Message published");

        Ok(id)
    }

    async fn create_schedule(&self, request: ScheduleRequest) -> OrchestrationResult<String> {
        let id = format!("sched-{}", Uuid::new_v4());
        self.state.lock().schedules.insert(id.clone(), request);
        Ok(id)
    }

    async fn delete_schedule(&self, schedule_id: &str) -> OrchestrationResult<bool> {
        Ok(self.state.lock().schedules.remove(schedule_id).is_some())
    }

    async fn ping(&self) -> OrchestrationResult<()> {
        Ok(())
    }
}
