//! The boundary between scheduling and model providers.

use std::future::Future;

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::ExecutorError;
use crate::model::{AgentOutput, Task};

/// Runs one task on behalf of an agent. Implementations own every
/// provider-side concern: model and provider routing (keyed off
/// `task.agent_id`), credentials, request timeouts and any retry policy.
/// The orchestrator treats an `Err` as final for that task and never
/// retries; it measures wall-clock duration around this call.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn run(
        &self,
        task: &Task,
        context: &ExecutionContext,
    ) -> Result<AgentOutput, ExecutorError>;
}

/// Adapts an async closure into an [`AgentExecutor`]. The closure receives
/// owned clones so its future is free of borrows. Handy for tests and
/// small embedders that don't need a full provider client.
pub struct FnExecutor<F> {
    func: F,
}

impl<F> FnExecutor<F> {
    pub fn new<Fut>(func: F) -> Self
    where
        F: Fn(Task, ExecutionContext) -> Fut + Send + Sync,
        Fut: Future<Output = Result<AgentOutput, ExecutorError>> + Send,
    {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> AgentExecutor for FnExecutor<F>
where
    F: Fn(Task, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AgentOutput, ExecutorError>> + Send,
{
    async fn run(
        &self,
        task: &Task,
        context: &ExecutionContext,
    ) -> Result<AgentOutput, ExecutorError> {
        (self.func)(task.clone(), context.clone()).await
    }
}
