//! Saga runs against shared infrastructure: persisted results and published events

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use stepflow_core::events::{names, EventPublisher};
use stepflow_core::persistence::{InMemoryKeyValueStore, KeyValueStore, KeyValueStoreExt};
use stepflow_core::saga::{
    FnSagaStep, KeyValueResultStore, SagaBuilder, SagaContext, SagaCoordinator, SagaStatus,
};
use stepflow_core::OrchestrationError;

#[tokio::test]
async fn test_payment_failure_releases_reservation() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let failures = Arc::new(Mutex::new(Vec::<String>::new()));

    let reserve_log = log.clone();
    let release_log = log.clone();
    let hook_failures = failures.clone();
    let saga = SagaBuilder::new("order", "Place order")
        .step(
            FnSagaStep::new("reserve", move |input, _ctx| {
                reserve_log.lock().push(format!("reserve {}", input["order_id"]));
                async { Ok(json!({ "reservation": "r-1" })) }
            })
            .with_compensation(move |_input, output, _ctx| {
                release_log.lock().push(format!("release {}", output["reservation"]));
                async { Ok(()) }
            }),
        )
        .step(FnSagaStep::new("pay", |_input, _ctx| async {
            Err(OrchestrationError::step_failed("pay", "Payment failed"))
        }))
        .on_failure(move |result, _ctx| {
            hook_failures
                .lock()
                .push(result.failed_step.clone().unwrap_or_default());
            Ok(())
        })
        .build()
        .unwrap();

    let publisher = EventPublisher::new(64);
    let mut events = publisher.subscribe();
    let coordinator = SagaCoordinator::new().with_events(Arc::new(publisher));

    let result = coordinator.execute(&saga, json!({ "order_id": 42 })).await;

    assert!(!result.success);
    assert_eq!(result.status, SagaStatus::Compensated);
    assert_eq!(result.failed_step.as_deref(), Some("pay"));
    assert!(result.error_message().unwrap().contains("Payment failed"));
    assert!(result.compensation_errors.is_empty());
    assert_eq!(result.state.get("reserve"), Some(&json!({ "reservation": "r-1" })));
    assert_eq!(*log.lock(), vec!["reserve 42", "release \"r-1\""]);
    assert_eq!(*failures.lock(), vec!["pay"]);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.payload["saga_id"], json!("order"));
        seen.push(event.name);
    }
    assert_eq!(
        seen,
        vec![
            names::SAGA_STARTED,
            names::SAGA_STEP_COMPLETED,
            names::SAGA_STEP_FAILED,
            names::SAGA_COMPENSATION_COMPLETED,
            names::SAGA_FAILED,
        ]
    );
}

#[tokio::test]
async fn test_results_persist_to_key_value_store() {
    let store = Arc::new(InMemoryKeyValueStore::new());
    let saga = SagaBuilder::new("ship", "Ship order")
        .step(FnSagaStep::new("label", |_input, _ctx| async {
            Ok(json!({ "tracking": "T-1" }))
        }))
        .step(FnSagaStep::new("notify", |_input, ctx: SagaContext| async move {
            let label = ctx.result("label").await?.unwrap_or_default();
            Ok(json!({ "sent_for": label["tracking"] }))
        }))
        .build()
        .unwrap();

    let ctx = SagaContext::new("ship", json!({}));
    let execution_id = ctx.execution_id;
    let ctx = ctx.with_results(Arc::new(KeyValueResultStore::new(
        store.clone(),
        "stepflow",
        execution_id,
    )));

    let result = SagaCoordinator::new().execute_with_context(&saga, ctx).await;
    assert!(result.success);
    assert_eq!(result.status, SagaStatus::Completed);
    assert_eq!(result.state["notify"], json!({ "sent_for": "T-1" }));

    let persisted: Option<serde_json::Value> = store
        .get_json(&format!("stepflow:saga:{execution_id}:label"))
        .await
        .unwrap();
    assert_eq!(persisted, Some(json!({ "tracking": "T-1" })));
    assert!(store.ping().await.is_ok());
}
