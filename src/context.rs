//! Per-task view of prior results, assembled right before dispatch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bus::MessageBus;
use crate::model::TaskResult;

/// How much prior output a task gets to see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    /// Only the outputs of the task's direct dependencies.
    #[default]
    Isolated,
    /// The outputs of every completed ancestor, however distant.
    Shared,
}

/// Read-only context handed to the executor for one task. Holds the
/// successful results selected by the strategy, in graph supply order;
/// a failed ancestor contributes nothing.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    task_id: String,
    agent_id: String,
    strategy: ContextStrategy,
    results: Vec<TaskResult>,
    bus: Option<Arc<MessageBus>>,
}

impl ExecutionContext {
    pub(crate) fn new(
        task_id: String,
        agent_id: String,
        strategy: ContextStrategy,
        results: Vec<TaskResult>,
        bus: Option<Arc<MessageBus>>,
    ) -> Self {
        Self {
            task_id,
            agent_id,
            strategy,
            results,
            bus,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn strategy(&self) -> ContextStrategy {
        self.strategy
    }

    /// Prior results visible to this task, supply order.
    pub fn results(&self) -> &[TaskResult] {
        &self.results
    }

    pub fn output_of(&self, task_id: &str) -> Option<&str> {
        self.results
            .iter()
            .find(|result| result.task_id == task_id)
            .map(|result| result.output.as_str())
    }

    /// Outputs joined into one prompt-ready block: a `## <task_id>` heading
    /// per section, sections in supply order. This is the textual
    /// convention executors can rely on when splicing context into a
    /// prompt.
    pub fn combined_context(&self) -> String {
        let mut combined = String::new();
        for result in &self.results {
            if !combined.is_empty() {
                combined.push_str("\n\n");
            }
            combined.push_str("## ");
            combined.push_str(&result.task_id);
            combined.push('\n');
            combined.push_str(&result.output);
        }
        combined
    }

    /// The inter-agent bus. Present only when communication was enabled on
    /// the orchestrator.
    pub fn bus(&self) -> Option<&Arc<MessageBus>> {
        self.bus.as_ref()
    }
}
