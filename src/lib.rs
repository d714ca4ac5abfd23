//! In-memory orchestration of LLM agent task graphs.
//!
//! Callers describe tasks (id, agent id, prompt, dependencies, priority),
//! provide an [`AgentExecutor`] that talks to their model provider, and get
//! back one [`TaskResult`] per task. The library's job is correct
//! concurrent scheduling: dependency ordering, bounded parallelism,
//! failure propagation, cooperative cancellation, inter-agent messaging
//! and typed progress events. Prompt assembly and provider access stay on
//! the caller's side of the [`AgentExecutor`] boundary.
//!
//! ```
//! use std::sync::Arc;
//! use maestro::{AgentOutput, FnExecutor, Orchestrator, OrchestratorConfig, Task};
//!
//! # async fn demo() -> Result<(), maestro::OrchestratorError> {
//! let executor = Arc::new(FnExecutor::new(|task, _ctx| async move {
//!     Ok(AgentOutput::new(format!("handled {}", task.id), 42))
//! }));
//!
//! let orchestrator = Orchestrator::new(executor, OrchestratorConfig::default());
//! let report = orchestrator
//!     .run(vec![
//!         Task::new("plan", "planner", "Plan the work", "Plan the feature"),
//!         Task::new("build", "builder", "Build it", "Implement the feature")
//!             .with_dependency("plan"),
//!     ])
//!     .await?;
//!
//! assert!(report.overall_success);
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod model;
pub mod orchestrator;
pub mod store;
pub mod workflow;

pub use bus::{Message, MessageBus, MessageSubscription, Recipient};
pub use context::{ContextStrategy, ExecutionContext};
pub use error::{ExecutorError, GraphError, OrchestratorError, SchedulingError, WorkflowError};
pub use events::{
    BufferingEventSink, EventEnvelope, EventSink, LoggingEventSink, OrchestratorEvent,
};
pub use executor::{AgentExecutor, FnExecutor};
pub use graph::TaskGraph;
pub use model::{AgentOutput, Task, TaskFailure, TaskResult, TaskStatus};
pub use orchestrator::{
    CancelHandle, FailurePolicy, Orchestrator, OrchestratorConfig, OrchestratorConfigBuilder,
    RunReport,
};
pub use store::ResultStore;
pub use workflow::{ParameterSpec, TaskTemplate, WorkflowDefinition};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoAgent;

    #[async_trait]
    impl AgentExecutor for EchoAgent {
        async fn run(
            &self,
            task: &Task,
            context: &ExecutionContext,
        ) -> Result<AgentOutput, ExecutorError> {
            let mut content = format!("[{}] {}", task.agent_id, task.prompt);
            let upstream = context.combined_context();
            if !upstream.is_empty() {
                content.push('\n');
                content.push_str(&upstream);
            }
            Ok(AgentOutput::new(content, task.prompt.len() as u64))
        }
    }

    #[tokio::test]
    async fn end_to_end_two_task_chain() {
        let orchestrator = Orchestrator::new(Arc::new(EchoAgent), OrchestratorConfig::default());
        let report = orchestrator
            .run(vec![
                Task::new("outline", "planner", "Outline", "outline the essay"),
                Task::new("draft", "writer", "Draft", "draft the essay")
                    .with_dependency("outline"),
            ])
            .await
            .unwrap();

        assert!(report.overall_success);
        assert_eq!(report.results.len(), 2);
        let draft = report.result("draft").unwrap();
        assert!(draft.success);
        assert!(draft.output.contains("## outline"));
    }
}
