use serde_json::Value;
use tokio::sync::broadcast;

/// Narrow event-emission capability
pub trait EventEmitter: Send + Sync + std::fmt::Debug {
    fn emit(&self, name: &str, payload: Value);
}

/// Emitter that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _name: &str, _payload: Value) {}
}

/// High-throughput event publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub payload: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event with the given name and payload
    pub fn publish(&self, name: impl Into<String>, payload: Value) {
        let event = PublishedEvent {
            name: name.into(),
            payload,
            published_at: chrono::Utc::now(),
        };

        // send() only fails when nobody is subscribed, which is fine for lifecycle events
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventEmitter for EventPublisher {
    fn emit(&self, name: &str, payload: Value) {
        self.publish(name, payload);
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
