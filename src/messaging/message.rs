//! # Step Messages
//!
//! Self-contained step dispatch payload. It carries the full definition and the
//! execution input so the re-entry point can resume without any other lookup
//! than the execution record.

use crate::models::WorkflowDefinition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Message for step execution via queues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMessage {
    /// Provider that owns the execution
    pub provider: String,
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub step_id: String,
    pub definition: WorkflowDefinition,
    /// Execution input
    pub input: Value,
    /// Delivery attempt, starting at 1
    #[serde(default = "first_attempt")]
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

fn first_attempt() -> u32 {
    1
}

impl StepMessage {
    pub fn new(
        provider: impl Into<String>,
        execution_id: Uuid,
        definition: &WorkflowDefinition,
        step_id: impl Into<String>,
        input: Value,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider: provider.into(),
            execution_id,
            workflow_id: definition.id.clone(),
            step_id: step_id.into(),
            definition: definition.clone(),
            input,
            attempt: 1,
            enqueued_at,
        }
    }

    /// Convert to JSON for queue storage
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Create from JSON from queue
    pub fn from_json(json: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json)
    }

    /// Parse a raw webhook or queue body
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Same step, next delivery
    pub fn redelivery(&self, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            enqueued_at,
            ..self.clone()
        }
    }

    /// Get message age in milliseconds
    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        now.signed_duration_since(self.enqueued_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepDefinition;
    use serde_json::json;

    fn message() -> StepMessage {
        let definition = WorkflowDefinition::new("wf1", "Order", "1.0.0")
            .with_step(StepDefinition::new("s1", "reserve"));
        StepMessage::new("primary", Uuid::new_v4(), &definition, "s1", json!({"order": 1}), Utc::now())
    }

    #[test]
    fn test_wire_format_field_names() {
        let value = message().to_json().unwrap();
        for field in [
            "provider",
            "execution_id",
            "workflow_id",
            "step_id",
            "definition",
            "input",
            "attempt",
            "enqueued_at",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn test_attempt_defaults_to_first_delivery() {
        let mut value = message().to_json().unwrap();
        value.as_object_mut().unwrap().remove("attempt");

        let parsed = StepMessage::from_json(value).unwrap();
        assert_eq!(parsed.attempt, 1);
        assert_eq!(parsed.redelivery(Utc::now()).attempt, 2);
    }

    #[test]
    fn test_age_never_negative() {
        let msg = message();
        let earlier = msg.enqueued_at - chrono::Duration::seconds(5);
        assert_eq!(msg.age_ms(earlier), 0);
        assert_eq!(msg.age_ms(msg.enqueued_at + chrono::Duration::milliseconds(250)), 250);
    }
}
