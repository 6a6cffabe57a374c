//! Saga steps: the trait and a closure-backed implementation.

use super::SagaContext;
use crate::error::OrchestrationResult;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A step that can be executed and, optionally, compensated.
///
/// `input` is always the saga's input; earlier outputs are available through
/// [`SagaContext::result`].
#[async_trait]
pub trait SagaStep: Send + Sync {
    fn id(&self) -> &str;

    async fn execute(&self, input: &Value, ctx: &SagaContext) -> OrchestrationResult<Value>;

    /// Undo the step's effects given the input it ran with and the output it produced.
    ///
    /// The default is a no-op, suitable for read-only steps.
    async fn compensate(
        &self,
        input: &Value,
        output: &Value,
        ctx: &SagaContext,
    ) -> OrchestrationResult<()> {
        let _ = (input, output, ctx);
        Ok(())
    }

    fn has_compensation(&self) -> bool {
        false
    }
}

type ExecuteFn =
    Arc<dyn Fn(Value, SagaContext) -> BoxFuture<'static, OrchestrationResult<Value>> + Send + Sync>;
type CompensateFn = Arc<
    dyn Fn(Value, Value, SagaContext) -> BoxFuture<'static, OrchestrationResult<()>> + Send + Sync,
>;

/// Step built from closures
#[derive(Clone)]
pub struct FnSagaStep {
    id: String,
    execute: ExecuteFn,
    compensate: Option<CompensateFn>,
}

impl fmt::Debug for FnSagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSagaStep")
            .field("id", &self.id)
            .field("has_compensation", &self.compensate.is_some())
            .finish()
    }
}

impl FnSagaStep {
    pub fn new<F, Fut>(id: impl Into<String>, execute: F) -> Self
    where
        F: Fn(Value, SagaContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OrchestrationResult<Value>> + Send + 'static,
    {
        Self {
            id: id.into(),
            execute: Arc::new(move |input, ctx| Box::pin(execute(input, ctx))),
            compensate: None,
        }
    }

    pub fn with_compensation<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(Value, Value, SagaContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OrchestrationResult<()>> + Send + 'static,
    {
        self.compensate = Some(Arc::new(move |input, output, ctx| {
            Box::pin(compensate(input, output, ctx))
        }));
        self
    }
}

#[async_trait]
impl SagaStep for FnSagaStep {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, input: &Value, ctx: &SagaContext) -> OrchestrationResult<Value> {
        (self.execute)(input.clone(), ctx.clone()).await
    }

    async fn compensate(
        &self,
        input: &Value,
        output: &Value,
        ctx: &SagaContext,
    ) -> OrchestrationResult<()> {
        match &self.compensate {
            Some(compensate) => compensate(input.clone(), output.clone(), ctx.clone()).await,
            None => Ok(()),
        }
    }

    fn has_compensation(&self) -> bool {
        self.compensate.is_some()
    }
}
