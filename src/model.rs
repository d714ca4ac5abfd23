//! Core data model: tasks, statuses, executor outputs and per-task results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ExecutorError;

/// One unit of work, executed by a single agent.
///
/// Tasks are immutable once handed to the orchestrator except for `status`,
/// which only the orchestrator mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Caller-chosen id, unique within one run. Referenced by dependents.
    pub id: String,
    /// Which agent runs this task. Provider/model routing happens inside
    /// the executor, keyed by this id.
    pub agent_id: String,
    /// Short human-readable summary, surfaced in events and logs.
    pub description: String,
    /// Opaque payload handed to the executor. Never inspected here.
    pub prompt: String,
    /// Ids of tasks that must complete before this one starts.
    pub dependencies: Vec<String>,
    /// Higher priority is admitted earlier among simultaneously ready tasks.
    pub priority: i32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        description: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            description: description.into(),
            prompt: prompt.into(),
            dependencies: Vec::new(),
            priority: 0,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Task lifecycle. Transitions only move forward:
/// `Pending -> Ready -> Running -> {Completed | Failed}`, with
/// `Pending`/`Ready` also able to jump straight to `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Ready, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Pending, Skipped)
                | (Ready, Skipped)
        )
    }
}

/// Successful executor payload: the model's output plus token usage.
/// Wall-clock duration is measured by the orchestrator around the call,
/// not self-reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub content: String,
    pub tokens_used: u64,
}

impl AgentOutput {
    pub fn new(content: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            content: content.into(),
            tokens_used,
        }
    }
}

/// Why a task ended without a successful output. Carried inside
/// [`TaskResult::error`]; this is result data, not a control-flow error.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskFailure {
    /// The executor returned an error for this task.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// Skipped because a task this one (transitively) depends on failed.
    #[error("Skipped: upstream task '{failed_task}' failed: {cause}")]
    Upstream { failed_task: String, cause: String },

    /// Skipped because the run was cancelled before this task started.
    #[error("Skipped: run was cancelled before the task started")]
    Cancelled,
}

/// Terminal record for one task. Exactly one of these exists per task id in
/// the final report; `error` is present iff `success` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub agent_id: String,
    pub success: bool,
    /// Output text. Empty when the task did not complete.
    pub output: String,
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub error: Option<TaskFailure>,
}

impl TaskResult {
    pub fn completed(task: &Task, output: AgentOutput, duration_ms: u64) -> Self {
        Self {
            task_id: task.id.clone(),
            agent_id: task.agent_id.clone(),
            success: true,
            output: output.content,
            tokens_used: output.tokens_used,
            duration_ms,
            error: None,
        }
    }

    pub fn failed(task: &Task, error: ExecutorError, duration_ms: u64) -> Self {
        Self {
            task_id: task.id.clone(),
            agent_id: task.agent_id.clone(),
            success: false,
            output: String::new(),
            tokens_used: 0,
            duration_ms,
            error: Some(TaskFailure::Executor(error)),
        }
    }

    pub fn skipped(task: &Task, failed_task: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            task_id: task.id.clone(),
            agent_id: task.agent_id.clone(),
            success: false,
            output: String::new(),
            tokens_used: 0,
            duration_ms: 0,
            error: Some(TaskFailure::Upstream {
                failed_task: failed_task.into(),
                cause: cause.into(),
            }),
        }
    }

    pub fn cancelled(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            agent_id: task.agent_id.clone(),
            success: false,
            output: String::new(),
            tokens_used: 0,
            duration_ms: 0,
            error: Some(TaskFailure::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn task_builder_chains() {
        let task = Task::new("api", "backend-architect", "Design the API", "Design a REST API")
            .with_dependency("schema")
            .with_dependencies(vec!["auth", "models"])
            .with_priority(5);

        assert_eq!(task.id, "api");
        assert_eq!(task.agent_id, "backend-architect");
        assert_eq!(task.dependencies, vec!["schema", "auth", "models"]);
        assert_eq!(task.priority, 5);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Ready.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
    }

    #[test]
    fn legal_transitions_only_move_forward() {
        use TaskStatus::*;
        assert!(Pending.can_transition(Ready));
        assert!(Ready.can_transition(Running));
        assert!(Running.can_transition(Completed));
        assert!(Running.can_transition(Failed));
        assert!(Pending.can_transition(Skipped));
        assert!(Ready.can_transition(Skipped));

        assert!(!Completed.can_transition(Running));
        assert!(!Failed.can_transition(Pending));
        assert!(!Running.can_transition(Ready));
        assert!(!Running.can_transition(Skipped));
        assert!(!Skipped.can_transition(Completed));
        assert!(!Pending.can_transition(Completed));
    }

    #[test]
    fn completed_result_has_no_error() {
        let task = Task::new("a", "researcher", "Research", "Find prior art");
        let result = TaskResult::completed(&task, AgentOutput::new("findings", 120), 45);

        assert!(result.success);
        assert_eq!(result.output, "findings");
        assert_eq!(result.tokens_used, 120);
        assert_eq!(result.duration_ms, 45);
        assert_eq!(result.error, None);
    }

    #[test]
    fn failed_result_carries_executor_error() {
        let task = Task::new("a", "researcher", "Research", "Find prior art");
        let result = TaskResult::failed(&task, ExecutorError::RateLimited, 10);

        assert!(!result.success);
        assert_eq!(
            result.error,
            Some(TaskFailure::Executor(ExecutorError::RateLimited))
        );
    }

    #[test]
    fn skipped_result_names_the_upstream_failure() {
        let task = Task::new("b", "writer", "Write", "Write the report");
        let result = TaskResult::skipped(&task, "a", "Provider error: boom");

        assert!(!result.success);
        match result.error {
            Some(TaskFailure::Upstream {
                ref failed_task,
                ref cause,
            }) => {
                assert_eq!(failed_task, "a");
                assert_eq!(cause, "Provider error: boom");
            }
            ref other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[test]
    fn cancelled_result_is_marked_cancelled() {
        let task = Task::new("c", "writer", "Write", "Write the report");
        let result = TaskResult::cancelled(&task);
        assert_eq!(result.error, Some(TaskFailure::Cancelled));
        assert!(!result.success);
    }
}
