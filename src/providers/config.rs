//! Provider kinds and registration settings

use crate::config::ProviderSettings;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::messaging::{InMemoryMessageQueue, MessageQueue};
use crate::persistence::{InMemoryKeyValueStore, KeyValueStore};
use crate::providers::{QueueWorkflowProvider, WorkflowProvider};
use crate::utils::Clock;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Closed set of provider implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Queue + key-value store supplied by the caller
    Queue,
    /// Queue-backed provider over in-process store and queue
    Memory,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "memory" => Ok(Self::Memory),
            _ => Err(OrchestrationError::UnknownProviderType {
                provider_type: s.to_string(),
            }),
        }
    }
}

/// Everything needed to construct one provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Parsed into [`ProviderKind`] at initialization
    pub provider_type: String,
    pub key_prefix: String,
    pub queue_name: String,
    /// Make this the engine's default provider
    pub default: bool,
    pub store: Option<Arc<dyn KeyValueStore>>,
    pub queue: Option<Arc<dyn MessageQueue>>,
}

impl ProviderConfig {
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            key_prefix: "stepflow".to_string(),
            queue_name: "stepflow_steps".to_string(),
            default: false,
            store: None,
            queue: None,
        }
    }

    /// In-process provider
    pub fn memory() -> Self {
        Self::new(ProviderKind::Memory.as_str())
    }

    /// Queue-backed provider over caller-supplied backends
    pub fn queue(store: Arc<dyn KeyValueStore>, queue: Arc<dyn MessageQueue>) -> Self {
        Self::new(ProviderKind::Queue.as_str())
            .with_store(store)
            .with_queue(queue)
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            provider_type: settings.provider_type.clone(),
            key_prefix: settings.key_prefix.clone(),
            queue_name: settings.queue_name.clone(),
            default: settings.default,
            store: None,
            queue: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn kind(&self) -> OrchestrationResult<ProviderKind> {
        self.provider_type.parse()
    }

    /// Construct the provider this config describes
    pub fn build(&self, name: &str, clock: Arc<dyn Clock>) -> OrchestrationResult<Arc<dyn WorkflowProvider>> {
        let provider: Arc<dyn WorkflowProvider> = match self.kind()? {
            ProviderKind::Queue => Arc::new(QueueWorkflowProvider::new(
                name,
                &self.key_prefix,
                &self.queue_name,
                self.store.clone(),
                self.queue.clone(),
                clock,
            )),
            ProviderKind::Memory => {
                let store = self
                    .store
                    .clone()
                    .unwrap_or_else(|| Arc::new(InMemoryKeyValueStore::new()));
                let queue = self
                    .queue
                    .clone()
                    .unwrap_or_else(|| Arc::new(InMemoryMessageQueue::new()));
                Arc::new(QueueWorkflowProvider::new(
                    name,
                    &self.key_prefix,
                    &self.queue_name,
                    Some(store),
                    Some(queue),
                    clock,
                ))
            }
        };
        Ok(provider)
    }
}
